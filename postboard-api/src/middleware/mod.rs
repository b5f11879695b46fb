/// Middleware modules for the API server
///
/// Bearer authentication lives next to the router (`app::auth_guard`)
/// because it needs `AppState`.

pub mod security;

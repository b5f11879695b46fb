/// Refresh-token cookie transport
///
/// The refresh token never appears in a response body. Login sets it as an
/// HttpOnly cookie scoped to `/`; refresh and logout read it back; logout
/// clears it with `Max-Age=0`.

use axum::http::{header, HeaderMap};
use cookie::{time, Cookie, SameSite};

/// Cookie carrying the refresh token
pub const REFRESH_COOKIE: &str = "refreshToken";

/// `Set-Cookie` value for a freshly issued refresh token
pub fn refresh_cookie(token: &str, max_age: chrono::Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .path("/")
        .max_age(time::Duration::seconds(max_age.num_seconds()))
        .build()
}

/// `Set-Cookie` value that removes the refresh token
pub fn clear_refresh_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, ""))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

/// Reads the refresh token from the request's `Cookie` headers
///
/// Unparseable cookie pairs are skipped; an empty value counts as absent.
pub fn read_refresh_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value.to_string()))
        .filter_map(Result::ok)
        .find(|c| c.name() == REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Application state and router builder
///
/// # Example
///
/// ```no_run
/// use postboard_api::app::{build_router, AppState, Backends};
/// use postboard_api::config::Config;
/// use postboard_shared::auth::password::PasswordParams;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let state = AppState::new(config, Backends::in_memory(), PasswordParams::default())?;
/// let app = build_router(state);
///
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```

use crate::{config::Config, error::ApiError, middleware::security::SecurityHeadersLayer};
use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use postboard_shared::{
    auth::{
        middleware::bearer_token,
        password::PasswordParams,
        session::SessionService,
        token_service::{TokenError, TokenService},
    },
    billing::{quota::QuotaEnforcer, stripe::PaymentProvider, BillingConfig, BillingService},
    posts::PostService,
    search::{DisabledSearchIndex, SearchIndex},
    storage::{DisabledStorage, ObjectStorage, MAX_IMAGE_BYTES},
    store::{CredentialStore, MemoryStore, PostStore, SubscriptionStore},
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Room for the text fields and multipart framing around an image
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Stores and external clients the services are built on
#[derive(Clone)]
pub struct Backends {
    pub credentials: Arc<dyn CredentialStore>,
    pub posts: Arc<dyn PostStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub search: Arc<dyn SearchIndex>,
    pub storage: Arc<dyn ObjectStorage>,
    pub payments: Option<Arc<dyn PaymentProvider>>,

    /// Present when running against Postgres; reported by `/health`
    pub db: Option<PgPool>,
}

impl Backends {
    /// One shared [`MemoryStore`], no integrations
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            credentials: store.clone(),
            posts: store.clone(),
            subscriptions: store,
            search: Arc::new(DisabledSearchIndex),
            storage: Arc::new(DisabledStorage),
            payments: None,
            db: None,
        }
    }
}

/// Shared application state
///
/// Cloned for each request handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionService>,
    pub tokens: Arc<TokenService>,
    pub posts: Arc<PostService>,
    pub billing: Arc<BillingService>,
    pub db: Option<PgPool>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the services over `backends`
    ///
    /// # Errors
    ///
    /// Returns an error if the JWT settings are unusable.
    pub fn new(
        config: Config,
        backends: Backends,
        password: PasswordParams,
    ) -> Result<Self, TokenError> {
        let tokens = Arc::new(TokenService::new(
            config.jwt.token_config(),
            backends.credentials.clone(),
        )?);

        let sessions = Arc::new(SessionService::new(
            backends.credentials.clone(),
            tokens.clone(),
            password,
        ));

        let quota = QuotaEnforcer::new(backends.subscriptions.clone(), backends.posts.clone());
        let posts = Arc::new(
            PostService::new(backends.posts, quota, backends.search, backends.storage)
                .with_limits(config.enforce_post_limits),
        );

        let billing = Arc::new(BillingService::new(
            backends.payments,
            backends.credentials,
            backends.subscriptions,
            BillingConfig {
                webhook_secret: config
                    .stripe
                    .as_ref()
                    .and_then(|stripe| stripe.webhook_secret.clone()),
                app_base_url: config.api.app_base_url.clone(),
            },
        ));

        Ok(Self {
            sessions,
            tokens,
            posts,
            billing,
            db: backends.db,
            config: Arc::new(config),
        })
    }

    /// Whether refresh cookies carry `Secure`
    pub fn secure_cookies(&self) -> bool {
        self.config.api.production
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── GET    /health
/// ├── /auth
/// │   ├── POST /register
/// │   ├── POST /login             sets the refreshToken cookie
/// │   ├── POST /refresh           cookie
/// │   ├── POST /logout            cookie, clears it
/// │   └── GET  /me                bearer
/// ├── /posts
/// │   ├── GET    /                bearer, policy-filtered
/// │   ├── POST   /                bearer, multipart
/// │   ├── GET    /search?q=
/// │   ├── GET    /:id
/// │   ├── PATCH  /:id             bearer, multipart
/// │   └── DELETE /:id             bearer
/// └── /subscriptions
///     ├── POST /checkout          bearer
///     ├── POST /portal            bearer
///     ├── GET  /me                bearer
///     └── POST /webhook           Stripe signature
/// ```
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. Security headers
/// 2. CORS (tower-http CorsLayer)
/// 3. Logging (tower-http TraceLayer)
/// 4. Authentication (`auth_guard`, per route)
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let guard = || axum::middleware::from_fn_with_state(state.clone(), auth_guard);

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let auth_routes = Router::new()
        .route("/me", get(routes::auth::me))
        .route_layer(guard())
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh))
        .route("/logout", post(routes::auth::logout));

    let post_routes = Router::new()
        .route(
            "/",
            get(routes::posts::list_posts).post(routes::posts::create_post),
        )
        .route(
            "/:id",
            axum::routing::patch(routes::posts::update_post).delete(routes::posts::delete_post),
        )
        .route_layer(guard())
        .route("/search", get(routes::posts::search_posts))
        .route("/:id", get(routes::posts::get_post))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + FORM_OVERHEAD_BYTES));

    let subscription_routes = Router::new()
        .route("/checkout", post(routes::subscriptions::create_checkout_session))
        .route("/portal", post(routes::subscriptions::create_portal_session))
        .route("/me", get(routes::subscriptions::get_subscription))
        .route_layer(guard())
        .route("/webhook", post(routes::subscriptions::handle_webhook));

    // Configure CORS based on environment
    let cors = if state.config.allows_any_origin() {
        // Development mode: permissive CORS
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .merge(health_routes)
        .nest("/auth", auth_routes)
        .nest("/posts", post_routes)
        .nest("/subscriptions", subscription_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

/// Bearer authentication guard
///
/// Verifies the access token and injects an `AuthContext` into the request
/// extensions. Rejections are 401 with the envelope.
async fn auth_guard(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())?;
    let auth_context = state.tokens.verify_access_token(token)?;

    req.extensions_mut().insert(auth_context);

    Ok(next.run(req).await)
}

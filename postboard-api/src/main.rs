//! # Postboard API Server
//!
//! HTTP server for accounts, posts and subscriptions.
//!
//! ## Startup
//!
//! 1. Load configuration from the environment (`.env` honoured)
//! 2. Connect to Postgres and apply pending migrations
//! 3. Build the optional integrations: Typesense, Supabase Storage, Stripe
//! 4. Serve until Ctrl-C, then drain and close the pool
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p postboard-api
//! ```

use anyhow::Context;
use postboard_api::{
    app::{build_router, AppState, Backends},
    config::Config,
};
use postboard_shared::{
    auth::password::PasswordParams,
    billing::stripe::{PaymentProvider, StripeClient},
    db::{
        migrations::run_migrations,
        pool::{self, create_pool},
    },
    search::{DisabledSearchIndex, SearchIndex, TypesenseConfig, TypesenseIndex},
    storage::{DisabledStorage, ObjectStorage, SupabaseConfig, SupabaseStorage},
    store::PgStore,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "postboard_api=debug,postboard_shared=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Postboard API v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env().context("Failed to load configuration")?;

    let db = create_pool(pool::DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        ..Default::default()
    })
    .await
    .context("Failed to connect to database")?;

    run_migrations(&db)
        .await
        .context("Failed to run database migrations")?;

    let backends = build_backends(&config, db.clone()).await?;
    let address = config.bind_address();

    let state = AppState::new(config, backends, PasswordParams::default())
        .context("Invalid JWT configuration")?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!(address = %address, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down");
    pool::close_pool(db).await;

    Ok(())
}

/// Postgres stores plus whichever integrations are configured
async fn build_backends(config: &Config, db: sqlx::PgPool) -> anyhow::Result<Backends> {
    let store = Arc::new(PgStore::new(db.clone()));

    let search: Arc<dyn SearchIndex> = match &config.search {
        Some(search) => {
            let index = TypesenseIndex::new(TypesenseConfig::new(&search.url, &search.api_key))
                .context("Failed to build search client")?;
            if let Err(e) = index.ensure_collection().await {
                warn!(error = %e, "Search collection unavailable; indexing will be retried per write");
            }
            Arc::new(index)
        }
        None => {
            warn!("TYPESENSE_URL not set, search disabled");
            Arc::new(DisabledSearchIndex)
        }
    };

    let storage: Arc<dyn ObjectStorage> = match &config.storage {
        Some(storage) => Arc::new(
            SupabaseStorage::new(SupabaseConfig::new(
                &storage.url,
                &storage.service_key,
                &storage.bucket,
            ))
            .context("Failed to build storage client")?,
        ),
        None => {
            warn!("SUPABASE_URL not set, image uploads disabled");
            Arc::new(DisabledStorage)
        }
    };

    let payments: Option<Arc<dyn PaymentProvider>> = match &config.stripe {
        Some(stripe) => {
            let client: Arc<dyn PaymentProvider> = Arc::new(
                StripeClient::new(&stripe.secret_key).context("Failed to build Stripe client")?,
            );
            Some(client)
        }
        None => {
            warn!("STRIPE_SECRET_KEY not set, billing endpoints disabled");
            None
        }
    };

    Ok(Backends {
        credentials: store.clone(),
        posts: store.clone(),
        subscriptions: store,
        search,
        storage,
        payments,
        db: Some(db),
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
}

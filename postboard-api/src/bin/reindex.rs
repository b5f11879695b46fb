//! # Postboard search reindex
//!
//! Upserts every stored post into the Typesense collection. Run it after an
//! index outage, or to seed a fresh collection.
//!
//! ```bash
//! cargo run -p postboard-api --bin postboard-reindex
//! ```
//!
//! Exits non-zero if any post failed to index.

use anyhow::{bail, Context};
use postboard_api::config::Config;
use postboard_shared::{
    billing::quota::QuotaEnforcer,
    db::pool::{self, create_pool},
    posts::PostService,
    search::{TypesenseConfig, TypesenseIndex},
    storage::DisabledStorage,
    store::PgStore,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postboard_shared=info,postboard_reindex=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let Some(search) = &config.search else {
        bail!("TYPESENSE_URL is not set; nothing to reindex into");
    };

    let db = create_pool(pool::DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        ..Default::default()
    })
    .await
    .context("Failed to connect to database")?;

    let store = Arc::new(PgStore::new(db.clone()));
    let index = TypesenseIndex::new(TypesenseConfig::new(&search.url, &search.api_key))
        .context("Failed to build search client")?;

    let posts = PostService::new(
        store.clone(),
        QuotaEnforcer::new(store.clone(), store),
        Arc::new(index),
        Arc::new(DisabledStorage),
    );

    let report = posts.reindex_all().await;
    pool::close_pool(db).await;
    let report = report.context("Reindex aborted")?;

    if report.failed > 0 {
        warn!(failed = report.failed, "Some posts were not indexed");
        bail!("{} of {} posts failed to index", report.failed, report.indexed + report.failed);
    }

    info!(indexed = report.indexed, "Reindexing complete");
    Ok(())
}

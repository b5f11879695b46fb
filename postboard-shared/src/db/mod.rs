/// Database layer for Postboard
///
/// # Modules
///
/// - `pool`: PostgreSQL connection pool with health checks
/// - `migrations`: embedded migration runner for `postboard-shared/migrations`
///
/// Row types and their queries live in [`crate::models`]; the store traits
/// that the services depend on live in [`crate::store`].
///
/// # Example
///
/// ```no_run
/// use postboard_shared::db::pool::{create_pool, DatabaseConfig};
/// use postboard_shared::db::migrations::run_migrations;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool(DatabaseConfig {
///         url: std::env::var("DATABASE_URL")?,
///         ..Default::default()
///     })
///     .await?;
///
///     run_migrations(&pool).await?;
///     Ok(())
/// }
/// ```

pub mod migrations;
pub mod pool;

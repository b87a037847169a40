//! Schema migrations, embedded from `migrations/` at build time.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Apply pending migrations. Already-applied ones are skipped.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

//! Database migration support.
//!
//! Embeds and runs the SQL migrations in `warden_core/migrations/`.

use sqlx::PgPool;
use tracing::info;

/// Run all embedded database migrations against the given pool.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    let migrator = sqlx::migrate!("./migrations");
    migrator.run(pool).await?;
    info!(applied = migrator.iter().count(), "database migrations up to date");
    Ok(())
}

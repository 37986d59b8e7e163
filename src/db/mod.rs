//! Catalog metadata store bootstrap.
//!
//! The catalog lives in SQLite. Schema management goes through sqlx
//! migrations (`migrations/`), so seeding and repeated runs share one
//! database file and pick up schema changes on startup; parallel runs are
//! safe because every writer upserts by natural key.

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::utils::error::CatalogResult;

/// Connect to the catalog database, creating the file when missing.
pub async fn connect(url: &str) -> CatalogResult<SqlitePool> {
    let url = if url.contains('?') {
        url.to_string()
    } else {
        format!("{url}?mode=rwc")
    };
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;
    Ok(pool)
}

/// Bring the catalog schema up to date.
pub async fn init_schema(pool: &SqlitePool) -> CatalogResult<()> {
    sqlx::migrate!().run(pool).await?;
    Ok(())
}

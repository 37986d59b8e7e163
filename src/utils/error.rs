//! Error types for the discovery engine

use thiserror::Error;

/// Errors that can occur while driving discovery against the source
/// database or the local catalog store.
///
/// "Normal" discovery outcomes (escalation, plateau, no viable candidate)
/// are modelled as enum values on the result types, never as errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(
        "Unsafe SQL identifier: {0:?}. Only letters, digits, underscores, spaces, and parentheses are allowed"
    )]
    UnsafeIdentifier(String),

    #[error("Invalid qualified name: {0:?}. Expected format: schema.table")]
    InvalidQualifiedName(String),

    #[error("Source database error: {0}")]
    Source(#[from] mysql_async::Error),

    #[error("Catalog store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Catalog migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

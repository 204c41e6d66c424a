//! Error types for citation persistence.

use thiserror::Error;

/// Errors from the citation store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A query or connection failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded migrations failed to apply.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A JSON column could not be encoded or decoded.
    #[error("failed to (de)serialize citation column: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested project has no row.
    #[error("project '{0}' not found\n  Suggestion: create it with `citetrack project add {0}`")]
    ProjectNotFound(String),

    /// A stored value is outside what this version understands.
    #[error("invalid value in column `{column}`: {value}")]
    InvalidValue {
        /// Column holding the value.
        column: &'static str,
        /// The offending value.
        value: String,
    },
}

impl StoreError {
    pub(crate) fn invalid_value(column: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            column,
            value: value.into(),
        }
    }
}

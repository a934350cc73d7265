//! Error types for finsync-core

use thiserror::Error;

/// Result type alias using finsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in finsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Conflict, strategy or scenario not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No strategy registered under the requested id
    #[error("Unknown resolution strategy: {0}")]
    UnknownStrategy(String),

    /// Strategy definition names an action or handler that does not exist
    #[error("Invalid strategy '{strategy}': {reason}")]
    InvalidStrategy { strategy: String, reason: String },

    /// Both snapshots violate the business rules checked by a compliance handler
    #[error("Compliance violation on conflict {conflict_id}: {violations}")]
    ComplianceViolation {
        conflict_id: String,
        violations: String,
    },

    /// A merge was requested with explicit data but none was supplied
    #[error("Manual decision for conflict {0} requires merged data")]
    MissingDecisionData(String),

    /// A resolution did not finish within the caller's deadline
    #[error("Resolution of conflict {0} timed out")]
    Timeout(String),
}

impl Error {
    pub(crate) fn invalid_strategy(strategy: &str, reason: impl Into<String>) -> Self {
        Self::InvalidStrategy {
            strategy: strategy.to_string(),
            reason: reason.into(),
        }
    }
}

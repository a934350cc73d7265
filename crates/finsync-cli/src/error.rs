use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] finsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No conflicts found in {0}")]
    EmptyInput(String),
    #[error("Conflict ID cannot be empty")]
    EmptyConflictId,
    #[error("Conflict not found for id/prefix: {0}")]
    ConflictNotFound(String),
    #[error("{0}")]
    AmbiguousConflictId(String),
    #[error("--data requires --choose merge")]
    DataRequiresMerge,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Aborted")]
    Aborted,
    #[error("{0} conflict(s) failed to resolve")]
    ResolutionFailed(usize),
    #[error("{0} scenario(s) failed")]
    ScenariosFailed(usize),
}

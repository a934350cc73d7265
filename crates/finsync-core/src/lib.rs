//! finsync-core - Conflict resolution for offline-synced financial records
//!
//! This crate contains the models, field-level diffing, rule precedence,
//! merging, pattern learning and local store used by the finsync CLI and by
//! any sync layer embedding the engine.

pub mod bulk;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod db;
pub mod defaults;
pub mod diff;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod harness;
pub mod merge;
pub mod models;
pub mod pattern;
pub mod predict;
pub mod rules;
pub mod stats;
pub mod sweep;
mod util;

pub use bulk::{
    bulk_resolve, bulk_resolve_concurrent, BulkResolutionOptions, BulkResolutionResult,
    BulkStrategy, ConcurrencyLimits,
};
pub use config::EngineConfig;
pub use engine::{ConflictEngine, Decision, PendingResolution, ResolutionOutcome};
pub use error::{Error, Result};
pub use harness::{ScenarioHarness, ScenarioReport};
pub use models::{Conflict, ConflictId, RecordSnapshot};
pub use stats::ConflictStats;
pub use sweep::{auto_resolve, AutoResolveResult};

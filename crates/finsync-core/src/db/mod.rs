//! Local store for conflicts, learned patterns and strategy configuration

mod conflict_repository;
mod connection;
mod migrations;
mod pattern_repository;
mod strategy_repository;

pub use connection::Database;
pub use conflict_repository::{ConflictRepository, SqliteConflictRepository};
pub use pattern_repository::{PatternRepository, SqlitePatternRepository};
pub use strategy_repository::{SqliteStrategyRepository, StrategyRepository};

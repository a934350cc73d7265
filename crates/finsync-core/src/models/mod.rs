//! Data models for finsync

mod conflict;
mod diff;
mod pattern;
mod scenario;
mod snapshot;
mod strategy;

pub use conflict::{
    Conflict, ConflictCategory, ConflictId, PendingOperation, Resolution, ResolutionAction,
    ResolutionRecord, ResolvedBy, Severity, Side,
};
pub use diff::{Diff, DiffType, MergeStrategy};
pub use pattern::{PatternKey, UserPattern};
pub use scenario::{Complexity, ExpectedOutcome, Frequency, ScenarioMetadata, TestScenario};
pub use snapshot::{parse_timestamp, value_kind, FieldMap, RecordSnapshot};
pub use strategy::{
    Comparison, Condition, CustomHandler, PerformanceProfile, PrecedenceRule, Predicate,
    ResolutionStrategy, RuleAction, RuleDefinition, StrategyDefinition, TestCoverage,
};

//! Bulk resolution coordinator.
//!
//! Best-effort batch semantics: a failing conflict is recorded in the error
//! list and the batch moves on. Confirmation prompts belong to the caller.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::defaults;
use crate::engine::{ConflictEngine, ResolutionOutcome};
use crate::error::{Error, Result};
use crate::models::{Conflict, PatternKey, ResolvedBy};
use crate::util::compact_text;

/// Strategies a bulk resolution may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStrategy {
    ClientWins,
    ServerWins,
    SmartMerge,
    UserPattern,
}

impl BulkStrategy {
    /// Id of the registered strategy this maps onto
    pub const fn strategy_id(self) -> &'static str {
        match self {
            Self::ClientWins => defaults::CLIENT_WINS,
            Self::ServerWins => defaults::SERVER_WINS,
            Self::SmartMerge => defaults::SMART_MERGE,
            Self::UserPattern => defaults::USER_PATTERN,
        }
    }
}

impl fmt::Display for BulkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.strategy_id())
    }
}

impl FromStr for BulkStrategy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "client_wins" => Ok(Self::ClientWins),
            "server_wins" => Ok(Self::ServerWins),
            "smart_merge" => Ok(Self::SmartMerge),
            "user_pattern" => Ok(Self::UserPattern),
            other => Err(Error::InvalidInput(format!(
                "unknown bulk strategy '{other}' (expected client-wins, server-wins, smart-merge or user-pattern)"
            ))),
        }
    }
}

/// Options for one bulk resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResolutionOptions {
    pub strategy: BulkStrategy,
    /// Restrict to conflicts of the same type as the first one when no
    /// explicit type filter is given
    #[serde(default)]
    pub apply_to_similar: bool,
    /// `entity:category` or bare entity type
    #[serde(default)]
    pub conflict_type: Option<String>,
    #[serde(default)]
    pub max_count: Option<usize>,
    /// Informational; the caller confirms before invoking
    #[serde(default)]
    pub require_confirmation: bool,
}

impl BulkResolutionOptions {
    pub const fn new(strategy: BulkStrategy) -> Self {
        Self {
            strategy,
            apply_to_similar: false,
            conflict_type: None,
            max_count: None,
            require_confirmation: false,
        }
    }
}

/// Per-conflict failure in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItemError {
    pub conflict_id: String,
    pub message: String,
}

/// Batch accounting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkResolutionResult {
    pub resolved: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<BulkItemError>,
}

impl BulkResolutionResult {
    fn record(&mut self, conflict: &Conflict, item: ItemStatus) {
        match item {
            ItemStatus::Resolved => self.resolved += 1,
            ItemStatus::Skipped => self.skipped += 1,
            ItemStatus::Failed(message) => {
                tracing::warn!(conflict_id = %conflict.id, "Bulk item failed: {message}");
                self.failed += 1;
                self.errors.push(BulkItemError {
                    conflict_id: conflict.id.to_string(),
                    message,
                });
            }
        }
    }
}

/// Bounds for `bulk_resolve_concurrent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    /// Pattern-key groups processed at once
    pub max_parallel: usize,
    pub item_timeout: Duration,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            item_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
enum ItemStatus {
    Resolved,
    Skipped,
    Failed(String),
}

impl ItemStatus {
    fn from_result(result: Result<ResolutionOutcome>) -> Self {
        match result {
            Ok(outcome) if outcome.is_resolved() => Self::Resolved,
            // Waiting on a human is not a failure
            Ok(_) => Self::Skipped,
            Err(error) => Self::Failed(compact_text(&error.to_string())),
        }
    }
}

/// Classify every conflict and return the indices the options select
fn select(engine: &ConflictEngine, conflicts: &mut [Conflict], options: &BulkResolutionOptions) -> Vec<usize> {
    for conflict in conflicts.iter_mut() {
        engine.prepare(conflict);
    }

    let filter = options.conflict_type.clone().or_else(|| {
        if options.apply_to_similar {
            conflicts.first().map(Conflict::conflict_type)
        } else {
            None
        }
    });

    let limit = options.max_count.unwrap_or(usize::MAX);
    conflicts
        .iter()
        .enumerate()
        .filter(|(_, conflict)| {
            filter.as_deref().map_or(true, |wanted| {
                conflict.conflict_type() == wanted || conflict.entity_type == wanted
            })
        })
        .map(|(index, _)| index)
        .take(limit)
        .collect()
}

/// Resolve a batch sequentially, in list order.
///
/// Conflicts outside the filter or past `max_count` count as skipped, as do
/// those the strategy hands back for human input.
pub fn bulk_resolve(
    engine: &ConflictEngine,
    conflicts: &mut [Conflict],
    options: &BulkResolutionOptions,
) -> BulkResolutionResult {
    let selected = select(engine, conflicts, options);
    let mut result = BulkResolutionResult {
        skipped: conflicts.len() - selected.len(),
        ..BulkResolutionResult::default()
    };

    let strategy_id = options.strategy.strategy_id();
    for index in selected {
        let conflict = &mut conflicts[index];
        let status = ItemStatus::from_result(engine.resolve(conflict, strategy_id, ResolvedBy::User));
        result.record(conflict, status);
    }

    tracing::info!(
        strategy = strategy_id,
        resolved = result.resolved,
        failed = result.failed,
        skipped = result.skipped,
        "Bulk resolution finished"
    );
    result
}

/// Resolve a batch with bounded parallelism.
///
/// Conflicts sharing a pattern key stay in one sequential group so learning
/// order is preserved; groups run in parallel up to `max_parallel`. Each item
/// is evaluated on the blocking pool and committed back on the group's task.
/// An evaluation exceeding `item_timeout` is never committed: it counts as
/// failed and the conflict is returned as it was before the attempt. A group
/// whose worker dies fails its items the same way. Conflicts come back in
/// their input order.
pub async fn bulk_resolve_concurrent(
    engine: Arc<ConflictEngine>,
    mut conflicts: Vec<Conflict>,
    options: BulkResolutionOptions,
    limits: ConcurrencyLimits,
) -> (Vec<Conflict>, BulkResolutionResult) {
    let selected = select(&engine, &mut conflicts, &options);
    let mut result = BulkResolutionResult {
        skipped: conflicts.len() - selected.len(),
        ..BulkResolutionResult::default()
    };

    let mut slots: Vec<Option<Conflict>> = conflicts.into_iter().map(Some).collect();
    let mut groups: Vec<Vec<(usize, Conflict)>> = Vec::new();
    let mut group_of: HashMap<PatternKey, usize> = HashMap::new();
    for index in selected {
        let Some(conflict) = slots[index].take() else {
            continue;
        };
        match conflict.pattern_key() {
            Some(key) => {
                let group = *group_of.entry(key).or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
                groups[group].push((index, conflict));
            }
            None => groups.push(vec![(index, conflict)]),
        }
    }

    let semaphore = Arc::new(Semaphore::new(limits.max_parallel.max(1)));
    let strategy_id = options.strategy.strategy_id();
    let mut workers = Vec::with_capacity(groups.len());
    for group in groups {
        let members = group.clone();
        let engine = Arc::clone(&engine);
        let semaphore = Arc::clone(&semaphore);
        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let mut done = Vec::with_capacity(group.len());
            for (index, conflict) in group {
                let (conflict, status) =
                    resolve_with_timeout(&engine, conflict, strategy_id, limits.item_timeout).await;
                done.push((index, conflict, status));
            }
            done
        });
        workers.push((members, handle));
    }

    for (members, handle) in workers {
        match handle.await {
            Ok(done) => {
                for (index, conflict, status) in done {
                    result.record(&conflict, status);
                    slots[index] = Some(conflict);
                }
            }
            Err(error) => {
                let message = compact_text(&format!("bulk worker stopped: {error}"));
                for (index, conflict) in members {
                    result.record(&conflict, ItemStatus::Failed(message.clone()));
                    slots[index] = Some(conflict);
                }
            }
        }
    }

    tracing::info!(
        strategy = strategy_id,
        resolved = result.resolved,
        failed = result.failed,
        skipped = result.skipped,
        "Concurrent bulk resolution finished"
    );
    (slots.into_iter().flatten().collect(), result)
}

async fn resolve_with_timeout(
    engine: &Arc<ConflictEngine>,
    conflict: Conflict,
    strategy_id: &'static str,
    item_timeout: Duration,
) -> (Conflict, ItemStatus) {
    let original = conflict.clone();
    let evaluator = Arc::clone(engine);
    let handle = tokio::task::spawn_blocking(move || {
        let mut conflict = conflict;
        let pending = evaluator.evaluate(&mut conflict, strategy_id, ResolvedBy::User);
        (conflict, pending)
    });

    match tokio::time::timeout(item_timeout, handle).await {
        Ok(Ok((mut conflict, Ok(pending)))) => {
            let outcome = engine.commit(&mut conflict, pending);
            (conflict, ItemStatus::from_result(Ok(outcome)))
        }
        Ok(Ok((conflict, Err(error)))) => (conflict, ItemStatus::from_result(Err(error))),
        Ok(Err(error)) => (original, ItemStatus::Failed(compact_text(&error.to_string()))),
        // The evaluation may still be running; its result is dropped uncommitted
        Err(_) => {
            let message = Error::Timeout(original.id.to_string()).to_string();
            (original, ItemStatus::Failed(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::defaults::COMPLIANCE;
    use crate::models::{
        Condition, CustomHandler, Diff, PrecedenceRule, RecordSnapshot, ResolutionAction,
        ResolutionStrategy, RuleAction,
    };
    use crate::predict::{Prediction, Predictor};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> RecordSnapshot {
        RecordSnapshot::from_value(value).unwrap()
    }

    fn goal(id: &str, client_amount: i64, server_amount: i64) -> Conflict {
        Conflict::new(
            "goal",
            id,
            snapshot(json!({"id": id, "currentAmount": client_amount, "updatedAt": 2_000})),
            snapshot(json!({"id": id, "currentAmount": server_amount, "updatedAt": 1_000})),
        )
    }

    /// Engine whose `client_wins` strategy runs the compliance handler
    fn compliance_engine() -> ConflictEngine {
        let engine = ConflictEngine::new(EngineConfig::default());
        engine.upsert_strategy(ResolutionStrategy::new(
            defaults::CLIENT_WINS,
            "Compliance gated",
            "",
            vec![PrecedenceRule::new(
                "check",
                0,
                Condition::Always,
                RuleAction::Custom(CustomHandler::ComplianceCheck),
            )],
        ));
        engine
    }

    /// Stalls on every conflict and panics on entity `crash`
    struct SlowPredictor(Duration);

    impl Predictor for SlowPredictor {
        fn predict(
            &self,
            conflict: &Conflict,
            _diffs: &[Diff],
            _config: &EngineConfig,
        ) -> Option<Prediction> {
            assert!(conflict.entity_id != "crash", "predictor crashed");
            std::thread::sleep(self.0);
            None
        }
    }

    #[test]
    fn test_parse_bulk_strategy() {
        assert_eq!("client-wins".parse::<BulkStrategy>().unwrap(), BulkStrategy::ClientWins);
        assert_eq!("smart_merge".parse::<BulkStrategy>().unwrap(), BulkStrategy::SmartMerge);
        assert_eq!(BulkStrategy::UserPattern.to_string(), "user_pattern");
        assert!("newest".parse::<BulkStrategy>().is_err());
    }

    #[test]
    fn test_one_failure_does_not_abort_batch() {
        let engine = compliance_engine();
        let mut conflicts = vec![
            goal("g1", 10, 5),
            goal("g2", -10, -5),
            goal("g3", 30, 20),
            goal("g4", 40, 35),
        ];
        let failing_id = conflicts[1].id.to_string();

        let result = bulk_resolve(
            &engine,
            &mut conflicts,
            &BulkResolutionOptions::new(BulkStrategy::ClientWins),
        );

        assert_eq!(result.resolved, 3);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.errors[0].conflict_id, failing_id);
        assert!(result.errors[0].message.contains("Compliance violation"));
        assert!(conflicts[3].is_resolved());
        assert!(conflicts[1].resolution_history.is_empty());
    }

    #[test]
    fn test_filter_and_max_count_skip() {
        let engine = ConflictEngine::default();
        let mut conflicts = vec![
            goal("g1", 10, 5),
            Conflict::new(
                "account",
                "a1",
                snapshot(json!({"id": "a1", "balance": 1})),
                snapshot(json!({"id": "a1", "balance": 2})),
            ),
            goal("g2", 20, 5),
            goal("g3", 30, 5),
        ];
        let options = BulkResolutionOptions {
            apply_to_similar: true,
            max_count: Some(2),
            ..BulkResolutionOptions::new(BulkStrategy::ServerWins)
        };

        let result = bulk_resolve(&engine, &mut conflicts, &options);

        assert_eq!(result.resolved, 2);
        assert_eq!(result.skipped, 2);
        assert!(conflicts[0].is_resolved());
        assert!(!conflicts[1].is_resolved());
        assert!(conflicts[2].is_resolved());
        assert!(!conflicts[3].is_resolved());
        assert_eq!(
            conflicts[0].last_resolution().unwrap().action,
            ResolutionAction::Server
        );
    }

    #[test]
    fn test_explicit_entity_filter() {
        let engine = ConflictEngine::default();
        let mut conflicts = vec![goal("g1", 10, 5), goal("g2", 20, 5)];
        let options = BulkResolutionOptions {
            conflict_type: Some("account".to_string()),
            ..BulkResolutionOptions::new(BulkStrategy::ClientWins)
        };

        let result = bulk_resolve(&engine, &mut conflicts, &options);
        assert_eq!(result.resolved, 0);
        assert_eq!(result.skipped, 2);
    }

    #[tokio::test]
    async fn test_concurrent_preserves_order_and_isolates_failures() {
        let engine = Arc::new(compliance_engine());
        let conflicts: Vec<Conflict> = (0..6)
            .map(|n| {
                let amount = if n == 2 { -1 } else { n * 10 };
                goal(&format!("g{n}"), amount, amount - 1).with_user(format!("u{}", n % 2))
            })
            .collect();
        let ids: Vec<String> = conflicts.iter().map(|c| c.id.to_string()).collect();

        let (conflicts, result) = bulk_resolve_concurrent(
            Arc::clone(&engine),
            conflicts,
            BulkResolutionOptions::new(BulkStrategy::ClientWins),
            ConcurrencyLimits {
                max_parallel: 2,
                item_timeout: Duration::from_secs(10),
            },
        )
        .await;

        assert_eq!(result.resolved, 5);
        assert_eq!(result.failed, 1);
        assert_eq!(
            conflicts.iter().map(|c| c.id.to_string()).collect::<Vec<_>>(),
            ids
        );
        assert!(!conflicts[2].is_resolved());
        assert!(conflicts[5].is_resolved());
    }

    #[tokio::test]
    async fn test_concurrent_unknown_strategy_fails_items() {
        let engine = Arc::new(ConflictEngine::default());
        engine
            .replace_strategies(vec![engine.strategy(COMPLIANCE).unwrap().to_definition()])
            .unwrap();

        let (conflicts, result) = bulk_resolve_concurrent(
            engine,
            vec![goal("g1", 1, 2)],
            BulkResolutionOptions::new(BulkStrategy::SmartMerge),
            ConcurrencyLimits::default(),
        )
        .await;

        assert_eq!(result.failed, 1);
        assert_eq!(conflicts.len(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_item_is_never_committed() {
        let engine = Arc::new(
            ConflictEngine::default()
                .with_predictor(Arc::new(SlowPredictor(Duration::from_millis(300)))),
        );

        let (conflicts, result) = bulk_resolve_concurrent(
            Arc::clone(&engine),
            vec![goal("g1", 10, 5).with_user("u1")],
            BulkResolutionOptions::new(BulkStrategy::ClientWins),
            ConcurrencyLimits {
                max_parallel: 1,
                item_timeout: Duration::from_millis(50),
            },
        )
        .await;

        assert_eq!(result.failed, 1);
        assert!(result.errors[0].message.contains("timed out"));
        assert!(conflicts[0].resolution_history.is_empty());
        assert_eq!(conflicts[0].attempts, 0);

        // Let the abandoned evaluation run to completion
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(engine.patterns().is_empty());
        assert_eq!(
            engine.strategy(defaults::CLIENT_WINS).unwrap().performance.resolutions,
            0
        );
    }

    #[tokio::test]
    async fn test_concurrent_worker_panic_fails_only_its_item() {
        let engine = Arc::new(
            ConflictEngine::default().with_predictor(Arc::new(SlowPredictor(Duration::ZERO))),
        );
        let conflicts = vec![goal("g1", 10, 5), goal("crash", 20, 5), goal("g3", 30, 5)];
        let crash_id = conflicts[1].id.to_string();

        let (conflicts, result) = bulk_resolve_concurrent(
            engine,
            conflicts,
            BulkResolutionOptions::new(BulkStrategy::ServerWins),
            ConcurrencyLimits::default(),
        )
        .await;

        assert_eq!(result.resolved, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors[0].conflict_id, crash_id);
        assert!(conflicts[0].is_resolved());
        assert!(conflicts[1].resolution_history.is_empty());
        assert!(conflicts[2].is_resolved());
    }
}

//! Single-conflict resolution pipeline.
//!
//! `ConflictEngine` owns the strategy registry, the shared pattern store, the
//! predictor and the clock. Resolution itself is synchronous and touches
//! shared state only through the pattern store and the rolling strategy
//! counters.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crate::classifier::classify;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::defaults;
use crate::error::{Error, Result};
use crate::merge::merge_record;
use crate::models::{
    Conflict, RecordSnapshot, Resolution, ResolutionAction, ResolutionRecord, ResolutionStrategy,
    ResolvedBy, StrategyDefinition, TestCoverage,
};
use crate::pattern::{PatternLearner, PatternStore};
use crate::predict::{HeuristicPredictor, Predictor};
use crate::rules::{evaluate_strategy, RuleContext, RuleOutcome, MERGE_CONFIDENCE, RULE_CONFIDENCE};

/// Confidence recorded for human decisions
pub const MANUAL_CONFIDENCE: f64 = 1.0;

/// Result of one resolution attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    Resolved {
        data: RecordSnapshot,
        record: ResolutionRecord,
    },
    /// Both snapshots handed back for a human decision
    RequiresInput {
        client: RecordSnapshot,
        server: RecordSnapshot,
        record: ResolutionRecord,
    },
}

impl ResolutionOutcome {
    pub const fn record(&self) -> &ResolutionRecord {
        match self {
            Self::Resolved { record, .. } | Self::RequiresInput { record, .. } => record,
        }
    }

    pub const fn data(&self) -> Option<&RecordSnapshot> {
        match self {
            Self::Resolved { data, .. } => Some(data),
            Self::RequiresInput { .. } => None,
        }
    }

    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

/// A resolution computed by [`ConflictEngine::evaluate`] and not yet
/// committed to its conflict, the pattern store or the strategy counters
#[derive(Debug, Clone, PartialEq)]
pub struct PendingResolution {
    outcome: ResolutionOutcome,
    strategy_id: String,
    elapsed_micros: u64,
}

impl PendingResolution {
    pub const fn outcome(&self) -> &ResolutionOutcome {
        &self.outcome
    }
}

/// A human decision on a conflict
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Client,
    Server,
    /// The engine's smart merge
    Merge,
    /// An explicit merged record supplied by the user
    Custom(RecordSnapshot),
}

impl Decision {
    /// Resolution the pattern learner is trained with
    pub const fn resolution(&self) -> Resolution {
        match self {
            Self::Client => Resolution::Client,
            Self::Server => Resolution::Server,
            Self::Merge | Self::Custom(_) => Resolution::Merge,
        }
    }
}

impl From<Resolution> for Decision {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Client => Self::Client,
            Resolution::Server => Self::Server,
            Resolution::Merge => Self::Merge,
        }
    }
}

/// The resolution pipeline: diff, classify, evaluate rules, learn
pub struct ConflictEngine {
    config: EngineConfig,
    strategies: RwLock<BTreeMap<String, ResolutionStrategy>>,
    patterns: Arc<PatternStore>,
    learner: PatternLearner,
    predictor: Arc<dyn Predictor>,
    clock: Arc<dyn Clock>,
    record_performance: bool,
}

impl ConflictEngine {
    /// Engine with the built-in strategies and an empty pattern store
    pub fn new(config: EngineConfig) -> Self {
        let strategies = defaults::strategies()
            .into_iter()
            .map(|strategy| (strategy.id.clone(), strategy))
            .collect();
        Self {
            learner: PatternLearner::new(config.patterns.clone()),
            config,
            strategies: RwLock::new(strategies),
            patterns: Arc::new(PatternStore::new()),
            predictor: Arc::new(HeuristicPredictor),
            clock: Arc::new(SystemClock),
            record_performance: true,
        }
    }

    #[must_use]
    pub fn with_predictor(mut self, predictor: Arc<dyn Predictor>) -> Self {
        self.predictor = predictor;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_patterns(mut self, patterns: Arc<PatternStore>) -> Self {
        self.patterns = patterns;
        self
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub const fn patterns(&self) -> &Arc<PatternStore> {
        &self.patterns
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Copy of a registered strategy
    pub fn strategy(&self, id: &str) -> Result<ResolutionStrategy> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownStrategy(id.to_string()))
    }

    /// All registered strategies, sorted by id
    pub fn strategies(&self) -> Vec<ResolutionStrategy> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Admin operation: validate every definition, then swap the registry.
    ///
    /// Nothing changes if any definition is invalid.
    pub fn replace_strategies(&self, definitions: Vec<StrategyDefinition>) -> Result<()> {
        let mut validated = BTreeMap::new();
        for definition in definitions {
            let strategy = ResolutionStrategy::try_from(definition)?;
            if validated.contains_key(&strategy.id) {
                return Err(Error::invalid_strategy(
                    &strategy.id,
                    "strategy id is defined more than once",
                ));
            }
            validated.insert(strategy.id.clone(), strategy);
        }

        let count = validated.len();
        *self.strategies.write().unwrap_or_else(PoisonError::into_inner) = validated;
        tracing::info!("Loaded {count} resolution strategies");
        Ok(())
    }

    /// Admin operation: add or replace one strategy
    pub fn upsert_strategy(&self, strategy: ResolutionStrategy) {
        tracing::info!(strategy = %strategy.id, "Registered resolution strategy");
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(strategy.id.clone(), strategy);
    }

    /// Store the latest scenario harness summary for a strategy
    pub fn record_coverage(&self, strategy_id: &str, coverage: TestCoverage) -> Result<()> {
        let mut strategies = self.strategies.write().unwrap_or_else(PoisonError::into_inner);
        let strategy = strategies
            .get_mut(strategy_id)
            .ok_or_else(|| Error::UnknownStrategy(strategy_id.to_string()))?;
        strategy.coverage = coverage;
        Ok(())
    }

    /// Recompute diffs and classification from the current snapshots
    pub fn prepare(&self, conflict: &mut Conflict) {
        classify(conflict, &self.config);
    }

    /// Resolve `conflict` with a registered strategy.
    ///
    /// Every successful outcome, including the fallback and the "requires
    /// input" sentinel, is appended to the conflict's history.
    pub fn resolve(
        &self,
        conflict: &mut Conflict,
        strategy_id: &str,
        resolved_by: ResolvedBy,
    ) -> Result<ResolutionOutcome> {
        let pending = self.evaluate(conflict, strategy_id, resolved_by)?;
        Ok(self.commit(conflict, pending))
    }

    /// First half of [`resolve`](Self::resolve): classify and run the rules.
    ///
    /// Reads the pattern store and strategy registry but writes nothing
    /// shared; only the conflict's own classification and attempt counter
    /// change. Dropping the result discards the resolution.
    pub fn evaluate(
        &self,
        conflict: &mut Conflict,
        strategy_id: &str,
        resolved_by: ResolvedBy,
    ) -> Result<PendingResolution> {
        let strategy = self.strategy(strategy_id)?;
        conflict.attempts = conflict.attempts.saturating_add(1);
        if !strategy.applies_to(&conflict.entity_type) {
            return Err(Error::InvalidInput(format!(
                "strategy '{}' does not apply to entity type '{}'",
                strategy.id, conflict.entity_type
            )));
        }

        let started = Instant::now();
        self.prepare(conflict);

        let pattern = conflict
            .pattern_key()
            .and_then(|key| self.patterns.get(&key));
        let prediction = self
            .predictor
            .predict(conflict, &conflict.diffs, &self.config);
        let ctx = RuleContext {
            conflict,
            diffs: &conflict.diffs,
            pattern: pattern.as_ref(),
            prediction,
            config: &self.config,
        };

        let decision = match evaluate_strategy(&strategy, &ctx) {
            Ok(decision) => decision,
            Err(error) => {
                tracing::warn!(
                    conflict_id = %conflict.id,
                    strategy = %strategy.id,
                    "Resolution failed: {error}"
                );
                return Err(error);
            }
        };

        let timestamp = self.clock.now_ms();
        let outcome = match decision.outcome {
            RuleOutcome::Resolved {
                data,
                action,
                confidence,
                note,
            } => {
                let record = ResolutionRecord {
                    timestamp,
                    action,
                    resolved_by,
                    strategy_id: Some(strategy.id.clone()),
                    rule_id: decision.rule_id,
                    merged_data: (action == ResolutionAction::Merge).then(|| data.clone()),
                    confidence,
                    note,
                    durable: false,
                };
                ResolutionOutcome::Resolved { data, record }
            }
            RuleOutcome::RequiresInput { note } => ResolutionOutcome::RequiresInput {
                client: conflict.client.clone(),
                server: conflict.server.clone(),
                record: ResolutionRecord {
                    timestamp,
                    action: ResolutionAction::Skip,
                    resolved_by: ResolvedBy::System,
                    strategy_id: Some(strategy.id.clone()),
                    rule_id: decision.rule_id,
                    merged_data: None,
                    confidence: 0.0,
                    note,
                    durable: false,
                },
            },
        };

        Ok(PendingResolution {
            outcome,
            strategy_id: strategy.id,
            elapsed_micros: elapsed_micros(started),
        })
    }

    /// Second half of [`resolve`](Self::resolve): append the record, train
    /// the pattern learner and update the strategy's performance profile
    pub fn commit(&self, conflict: &mut Conflict, pending: PendingResolution) -> ResolutionOutcome {
        let PendingResolution {
            outcome,
            strategy_id,
            elapsed_micros,
        } = pending;
        let record = outcome.record();
        let action = record.action;

        conflict.push_resolution(record.clone());
        if let (Some(key), Some(resolution)) = (conflict.pattern_key(), action.resolution()) {
            self.learner
                .observe(&self.patterns, &key, resolution, record.timestamp);
        }
        if self.record_performance {
            self.record_performance(&strategy_id, action, elapsed_micros);
        }

        tracing::info!(
            conflict_id = %conflict.id,
            strategy = %strategy_id,
            action = action.as_str(),
            confidence = record.confidence,
            "Resolved conflict"
        );
        outcome
    }

    /// Apply a human decision, typically after a "requires input" outcome
    pub fn resolve_with_decision(
        &self,
        conflict: &mut Conflict,
        decision: Decision,
    ) -> Result<ResolutionOutcome> {
        conflict.attempts = conflict.attempts.saturating_add(1);
        self.prepare(conflict);

        let resolution = decision.resolution();
        let (data, action, note) = match decision {
            Decision::Client => (
                conflict.client.clone(),
                ResolutionAction::Client,
                "manual decision: client".to_string(),
            ),
            Decision::Server => (
                conflict.server.clone(),
                ResolutionAction::Server,
                "manual decision: server".to_string(),
            ),
            Decision::Merge => {
                let merged =
                    merge_record(&conflict.client, &conflict.server, &conflict.diffs, &self.config);
                let note = if merged.notes.is_empty() {
                    "manual decision: smart merge".to_string()
                } else {
                    format!("manual decision: smart merge ({})", merged.notes.join("; "))
                };
                (merged.record, ResolutionAction::Merge, note)
            }
            Decision::Custom(data) => {
                if data.is_empty() {
                    return Err(Error::MissingDecisionData(conflict.id.to_string()));
                }
                (
                    data,
                    ResolutionAction::Merge,
                    "manual decision: custom merged record".to_string(),
                )
            }
        };

        let timestamp = self.clock.now_ms();
        let record = ResolutionRecord {
            timestamp,
            action,
            resolved_by: ResolvedBy::User,
            strategy_id: None,
            rule_id: None,
            merged_data: (action == ResolutionAction::Merge).then(|| data.clone()),
            confidence: MANUAL_CONFIDENCE,
            note,
            durable: false,
        };
        conflict.push_resolution(record.clone());
        if let Some(key) = conflict.pattern_key() {
            self.learner
                .observe(&self.patterns, &key, resolution, timestamp);
        }

        tracing::info!(
            conflict_id = %conflict.id,
            action = action.as_str(),
            "Applied manual decision"
        );
        Ok(ResolutionOutcome::Resolved { data, record })
    }

    /// Resolve with the classifier's own suggestion (auto-resolution sweep)
    pub fn resolve_suggested(&self, conflict: &mut Conflict) -> Result<ResolutionOutcome> {
        conflict.attempts = conflict.attempts.saturating_add(1);
        self.prepare(conflict);

        let suggestion = conflict.suggested_resolution.ok_or_else(|| {
            Error::InvalidInput(format!("conflict {} has no suggested resolution", conflict.id))
        })?;
        let (data, confidence) = match suggestion {
            Resolution::Client => (conflict.client.clone(), RULE_CONFIDENCE),
            Resolution::Server => (conflict.server.clone(), RULE_CONFIDENCE),
            Resolution::Merge => {
                let merged = conflict.smart_merge_suggestion.clone().ok_or_else(|| {
                    Error::InvalidInput(format!("conflict {} has no merge suggestion", conflict.id))
                })?;
                (merged, MERGE_CONFIDENCE)
            }
        };

        let action = ResolutionAction::from(suggestion);
        let timestamp = self.clock.now_ms();
        let record = ResolutionRecord {
            timestamp,
            action,
            resolved_by: ResolvedBy::Auto,
            strategy_id: None,
            rule_id: None,
            merged_data: (action == ResolutionAction::Merge).then(|| data.clone()),
            confidence,
            note: format!("auto-resolved with suggested {}", suggestion.as_str()),
            durable: false,
        };
        conflict.push_resolution(record.clone());
        if let Some(key) = conflict.pattern_key() {
            self.learner
                .observe(&self.patterns, &key, suggestion, timestamp);
        }
        Ok(ResolutionOutcome::Resolved { data, record })
    }

    /// Engine sharing strategies and collaborators but writing to a private
    /// copy of the pattern store and never touching performance counters
    pub fn isolated(&self) -> Self {
        Self {
            config: self.config.clone(),
            strategies: RwLock::new(
                self.strategies
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
            patterns: Arc::new(self.patterns.snapshot()),
            learner: self.learner.clone(),
            predictor: Arc::clone(&self.predictor),
            clock: Arc::clone(&self.clock),
            record_performance: false,
        }
    }

    fn record_performance(&self, strategy_id: &str, action: ResolutionAction, micros: u64) {
        let mut strategies = self.strategies.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(strategy) = strategies.get_mut(strategy_id) {
            strategy.performance.record(action, micros);
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_micros(started: Instant) -> u64 {
    started.elapsed().as_micros().min(u128::from(u64::MAX)) as u64
}

impl Default for ConflictEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

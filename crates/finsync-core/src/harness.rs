//! Scenario harness: contract checks for strategies.
//!
//! Scenarios run through the full resolution pipeline on an isolated engine,
//! so production patterns and performance counters are never touched. Only
//! the per-strategy coverage summary is written back.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::config::ScenarioConfig;
use crate::defaults;
use crate::engine::{ConflictEngine, ResolutionOutcome};
use crate::error::Result;
use crate::models::{
    Conflict, ExpectedOutcome, ResolutionStrategy, ResolvedBy, TestCoverage, TestScenario,
};
use crate::util::{compact_text, contains_field, round_to};

/// Outcome of one scenario against one strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub strategy_id: String,
    pub passed: bool,
    pub duration_micros: u64,
    /// Serialized size of the produced record, in bytes
    pub memory_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregate harness report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    /// Passed share of all tests (0-1); 1.0 when nothing ran
    pub overall_pass_rate: f64,
    pub per_scenario: Vec<ScenarioResult>,
}

/// Fixed scenario set run against registered strategies
#[derive(Debug, Clone, Default)]
pub struct ScenarioHarness {
    scenarios: Vec<TestScenario>,
}

impl ScenarioHarness {
    pub const fn new(scenarios: Vec<TestScenario>) -> Self {
        Self { scenarios }
    }

    /// Harness over the built-in scenarios
    pub fn with_defaults() -> Self {
        Self::new(defaults::scenarios())
    }

    pub fn scenarios(&self) -> &[TestScenario] {
        &self.scenarios
    }

    /// Add scenarios, replacing any with the same id
    pub fn extend(&mut self, scenarios: impl IntoIterator<Item = TestScenario>) {
        for scenario in scenarios {
            self.scenarios.retain(|existing| existing.id != scenario.id);
            self.scenarios.push(scenario);
        }
    }

    /// Run every applicable scenario for one strategy, or for all of them.
    ///
    /// Updates each exercised strategy's coverage on `engine`.
    pub fn run(&self, engine: &ConflictEngine, strategy_id: Option<&str>) -> Result<ScenarioReport> {
        let strategies = match strategy_id {
            Some(id) => vec![engine.strategy(id)?],
            None => engine.strategies(),
        };

        let sandbox = engine.isolated();
        let config = &engine.config().scenarios;
        let mut per_scenario = Vec::new();
        let mut coverage: BTreeMap<String, (usize, usize)> = BTreeMap::new();

        for strategy in &strategies {
            for scenario in self.applicable(strategy) {
                let result = run_scenario(&sandbox, strategy, scenario, config);
                let counts = coverage.entry(strategy.id.clone()).or_default();
                counts.0 += 1;
                if result.passed {
                    counts.1 += 1;
                }
                per_scenario.push(result);
            }
        }

        let now = engine.now_ms();
        for (id, (covered, passed)) in &coverage {
            engine.record_coverage(
                id,
                TestCoverage {
                    scenarios_covered: *covered,
                    pass_rate: pass_rate(*passed, *covered),
                    last_run: Some(now),
                },
            )?;
        }

        let total_tests = per_scenario.len();
        let passed_tests = per_scenario.iter().filter(|result| result.passed).count();
        let report = ScenarioReport {
            total_tests,
            passed_tests,
            failed_tests: total_tests - passed_tests,
            overall_pass_rate: pass_rate(passed_tests, total_tests),
            per_scenario,
        };
        tracing::info!(
            total = report.total_tests,
            passed = report.passed_tests,
            "Scenario run finished"
        );
        Ok(report)
    }

    fn applicable<'a>(
        &'a self,
        strategy: &'a ResolutionStrategy,
    ) -> impl Iterator<Item = &'a TestScenario> + 'a {
        self.scenarios.iter().filter(move |scenario| match &scenario.strategy_id {
            Some(pinned) => pinned == &strategy.id,
            None => strategy.applies_to(&scenario.entity_type),
        })
    }
}

fn pass_rate(passed: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        passed as f64 / total as f64
    }
}

#[allow(clippy::cast_possible_truncation)]
fn run_scenario(
    engine: &ConflictEngine,
    strategy: &ResolutionStrategy,
    scenario: &TestScenario,
    config: &ScenarioConfig,
) -> ScenarioResult {
    let mut conflict = Conflict::new(
        scenario.entity_type.clone(),
        scenario.id.clone(),
        scenario.client.clone(),
        scenario.server.clone(),
    )
    .with_operation(scenario.operation)
    .with_metadata(scenario.context.clone());
    conflict.user_id.clone_from(&scenario.user_id);

    let started = Instant::now();
    let outcome = engine.resolve(&mut conflict, &strategy.id, ResolvedBy::System);
    let duration_micros = started.elapsed().as_micros().min(u128::from(u64::MAX)) as u64;

    let (passed, memory_bytes, message) = match outcome {
        Ok(outcome) => {
            let memory_bytes = outcome
                .data()
                .and_then(|data| serde_json::to_vec(data).ok())
                .map_or(0, |bytes| bytes.len());
            let (passed, message) = check(&scenario.expected, &outcome, config);
            (passed, memory_bytes, message)
        }
        Err(error) => (false, 0, Some(compact_text(&error.to_string()))),
    };

    if !passed {
        tracing::warn!(
            scenario = %scenario.id,
            strategy = %strategy.id,
            "Scenario failed: {}",
            message.as_deref().unwrap_or("unexpected outcome")
        );
    }

    ScenarioResult {
        scenario_id: scenario.id.clone(),
        strategy_id: strategy.id.clone(),
        passed,
        duration_micros,
        memory_bytes,
        message,
    }
}

fn check(
    expected: &ExpectedOutcome,
    actual: &ResolutionOutcome,
    config: &ScenarioConfig,
) -> (bool, Option<String>) {
    match (expected, actual) {
        (ExpectedOutcome::RequiresInput, ResolutionOutcome::RequiresInput { .. }) => (true, None),
        (ExpectedOutcome::RequiresInput, ResolutionOutcome::Resolved { record, .. }) => (
            false,
            Some(format!("expected a prompt, got {}", record.action.as_str())),
        ),
        (ExpectedOutcome::Resolved { .. }, ResolutionOutcome::RequiresInput { .. }) => {
            (false, Some("expected a resolution, got a prompt".to_string()))
        }
        (
            ExpectedOutcome::Resolved { data, action },
            ResolutionOutcome::Resolved {
                data: actual_data,
                record,
            },
        ) => {
            if let Some(action) = action {
                if *action != record.action {
                    return (
                        false,
                        Some(format!(
                            "expected action {}, got {}",
                            action.as_str(),
                            record.action.as_str()
                        )),
                    );
                }
            }
            let expected = normalize(&data.clone().into_value(), config);
            let actual = normalize(&actual_data.clone().into_value(), config);
            if expected == actual {
                (true, None)
            } else {
                (
                    false,
                    Some(compact_text(&format!("expected {expected}, got {actual}"))),
                )
            }
        }
    }
}

/// Comparison form of a record: ignored fields dropped at every depth,
/// numbers rounded to the configured precision
pub fn normalize(value: &Value, config: &ScenarioConfig) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter(|(key, _)| !contains_field(&config.ignored_fields, key))
                .map(|(key, value)| (key.clone(), normalize(value, config)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|item| normalize(item, config)).collect()),
        Value::Number(number) => number
            .as_f64()
            .map_or_else(|| value.clone(), |float| Value::from(round_to(float, config.float_precision))),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::defaults::{SMART_MERGE, TIMESTAMP};
    use crate::models::{
        Condition, PrecedenceRule, Resolution, RuleAction, Side, UserPattern, PatternKey,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn engine() -> ConflictEngine {
        ConflictEngine::default().with_clock(Arc::new(FixedClock(42)))
    }

    #[test]
    fn test_default_scenarios_all_pass() {
        let engine = engine();
        let report = ScenarioHarness::with_defaults().run(&engine, None).unwrap();
        let failures: Vec<&ScenarioResult> =
            report.per_scenario.iter().filter(|result| !result.passed).collect();
        assert!(failures.is_empty(), "failed scenarios: {failures:?}");
        assert_eq!(report.total_tests, defaults::scenarios().len());
        assert!((report.overall_pass_rate - 1.0).abs() < f64::EPSILON);

        let coverage = engine.strategy(TIMESTAMP).unwrap().coverage;
        assert_eq!(coverage.scenarios_covered, 3);
        assert_eq!(coverage.last_run, Some(42));
    }

    #[test]
    fn test_reversed_rule_fails_scenario() {
        let engine = engine();
        engine.upsert_strategy(ResolutionStrategy::new(
            TIMESTAMP,
            "Reversed",
            "",
            vec![PrecedenceRule::new(
                "client-newer-loses",
                10,
                Condition::Newer { side: Side::Client },
                RuleAction::ServerWins,
            )],
        ));

        let report = ScenarioHarness::with_defaults()
            .run(&engine, Some(TIMESTAMP))
            .unwrap();
        let client_newer = report
            .per_scenario
            .iter()
            .find(|result| result.scenario_id == "client-newer-balance")
            .unwrap();
        assert!(!client_newer.passed);
        assert!(report.overall_pass_rate < 1.0);
        assert!(engine.strategy(TIMESTAMP).unwrap().coverage.pass_rate < 1.0);
    }

    #[test]
    fn test_run_never_mutates_production_state() {
        let engine = engine();
        let key = PatternKey::new("u1", "goal:data");
        engine.patterns().update(&key, |slot| {
            *slot = Some(UserPattern {
                preferred_resolution: Resolution::Client,
                confidence: 0.9,
                frequency: 3,
                last_used: 1,
            });
        });

        let mut harness = ScenarioHarness::with_defaults();
        let mut learned = harness.scenarios()[3].clone();
        learned.id = "learned".to_string();
        learned.user_id = Some("u1".to_string());
        harness.extend([learned]);
        harness.run(&engine, Some(SMART_MERGE)).unwrap();

        assert_eq!(engine.patterns().get(&key).unwrap().frequency, 3);
        assert_eq!(engine.strategy(SMART_MERGE).unwrap().performance.resolutions, 0);
    }

    #[test]
    fn test_normalize_rounds_and_drops_ignored_fields() {
        let config = ScenarioConfig::default();
        let value = json!({
            "amount": 10.004,
            "updatedAt": 5,
            "nested": {"resolvedAt": 1, "rate": 0.125},
            "_repairNotes": ["x"]
        });
        assert_eq!(
            normalize(&value, &config),
            json!({"amount": 10.0, "nested": {"rate": 0.13}})
        );
    }

    #[test]
    fn test_unknown_strategy_reports_error() {
        assert!(ScenarioHarness::with_defaults()
            .run(&engine(), Some("missing"))
            .is_err());
    }
}

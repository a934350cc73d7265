//! Rule engine: precedence-ordered condition evaluation and action dispatch.

use serde_json::Value;
use thiserror::Error;

use crate::classifier::owner_mismatch;
use crate::config::EngineConfig;
use crate::diff::newer_side;
use crate::error::Result;
use crate::handlers;
use crate::merge::merge_record;
use crate::models::{
    Comparison, Condition, Conflict, Diff, DiffType, PendingOperation, Predicate, RecordSnapshot,
    Resolution, ResolutionAction, ResolutionStrategy, RuleAction, Severity, Side, UserPattern,
};
use crate::predict::Prediction;

/// Confidence attached to an explicit `client_wins` / `server_wins` rule
pub const RULE_CONFIDENCE: f64 = 0.9;
/// Confidence attached to a smart merge
pub const MERGE_CONFIDENCE: f64 = 0.75;
/// Confidence attached to the no-match fallback
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

pub const FALLBACK_NOTE: &str = "no rule matched; default server-wins fallback";
pub const AWAITING_INPUT_NOTE: &str = "awaiting human input";

/// Failure while evaluating a single condition. Never escapes the rule engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("field '{field}' is missing on the {side} side")]
    MissingField { field: String, side: &'static str },

    #[error("field '{field}' is not numeric on the {side} side")]
    NotNumeric { field: String, side: &'static str },

    #[error("no readable '{0}' timestamp on both sides")]
    MissingTimestamp(String),
}

/// Read-only view a condition is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub conflict: &'a Conflict,
    pub diffs: &'a [Diff],
    pub pattern: Option<&'a UserPattern>,
    pub prediction: Option<Prediction>,
    pub config: &'a EngineConfig,
}

impl RuleContext<'_> {
    pub fn client(&self) -> &RecordSnapshot {
        &self.conflict.client
    }

    pub fn server(&self) -> &RecordSnapshot {
        &self.conflict.server
    }

    pub fn snapshot(&self, side: Side) -> &RecordSnapshot {
        match side {
            Side::Client => self.client(),
            Side::Server => self.server(),
        }
    }

    /// Newer side, falling back to the configured equal-timestamp winner
    pub fn newer_or_default(&self) -> Side {
        newer_side(self.client(), self.server(), self.config)
            .unwrap_or(self.config.equal_timestamp_winner)
    }
}

/// What a rule's action produced
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Resolved {
        data: RecordSnapshot,
        action: ResolutionAction,
        confidence: f64,
        note: String,
    },
    RequiresInput {
        note: String,
    },
}

impl RuleOutcome {
    pub const fn action(&self) -> ResolutionAction {
        match self {
            Self::Resolved { action, .. } => *action,
            Self::RequiresInput { .. } => ResolutionAction::Skip,
        }
    }

    fn prefix_note(mut self, prefix: &str) -> Self {
        match &mut self {
            Self::Resolved { note, .. } | Self::RequiresInput { note } => {
                *note = format!("{prefix}: {note}");
            }
        }
        self
    }
}

/// Winning rule (if any) and its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDecision {
    pub rule_id: Option<String>,
    pub outcome: RuleOutcome,
}

impl Condition {
    /// Evaluate against a context. Errors mean "could not decide".
    pub fn evaluate(&self, ctx: &RuleContext<'_>) -> std::result::Result<bool, ConditionError> {
        match self {
            Self::Always => Ok(true),
            Self::FieldEquals { side, field, value } => {
                Ok(ctx.snapshot(*side).get(field) == Some(value))
            }
            Self::FieldDiffers { field } => Ok(ctx.client().get(field) != ctx.server().get(field)),
            Self::FieldCompare { field, op } => compare_field(ctx, field, *op),
            Self::Newer { side } => newer_side(ctx.client(), ctx.server(), ctx.config)
                .map(|newer| newer == *side)
                .ok_or_else(|| ConditionError::MissingTimestamp(ctx.config.timestamp_field.clone())),
            Self::Pattern {
                min_confidence,
                preferred,
            } => Ok(ctx.pattern.is_some_and(|pattern| {
                pattern.confidence > *min_confidence
                    && preferred.map_or(true, |preferred| preferred == pattern.preferred_resolution)
            })),
            Self::Prediction {
                min_confidence,
                resolution,
            } => Ok(ctx.prediction.is_some_and(|prediction| {
                prediction.confidence >= *min_confidence
                    && resolution.map_or(true, |resolution| resolution == prediction.resolution)
            })),
            Self::Metadata { key, value } => Ok(ctx.conflict.metadata.get(key) == Some(value)),
            Self::Custom { predicate } => Ok(predicate.holds(ctx)),
            Self::All { conditions } => {
                for condition in conditions {
                    if !condition.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any { conditions } => {
                for condition in conditions {
                    if condition.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not { condition } => Ok(!condition.evaluate(ctx)?),
        }
    }
}

impl Predicate {
    fn holds(self, ctx: &RuleContext<'_>) -> bool {
        match self {
            Self::ClientOnlyAdditions => {
                !ctx.diffs.is_empty()
                    && ctx.diffs.iter().all(|diff| diff.diff_type == DiffType::Added)
            }
            Self::PendingDelete => ctx.conflict.operation == PendingOperation::Delete,
            Self::OwnerMismatch => owner_mismatch(ctx.conflict, ctx.config),
            Self::HasCriticalDiff => ctx
                .diffs
                .iter()
                .any(|diff| diff.severity == Severity::Critical),
        }
    }
}

fn compare_field(
    ctx: &RuleContext<'_>,
    field: &str,
    op: Comparison,
) -> std::result::Result<bool, ConditionError> {
    let client = ctx
        .client()
        .get(field)
        .ok_or_else(|| missing(field, Side::Client))?;
    let server = ctx
        .server()
        .get(field)
        .ok_or_else(|| missing(field, Side::Server))?;

    match op {
        Comparison::Eq => return Ok(client == server),
        Comparison::Ne => return Ok(client != server),
        Comparison::Gt | Comparison::Ge | Comparison::Lt | Comparison::Le => {}
    }

    let client = numeric(client).ok_or_else(|| not_numeric(field, Side::Client))?;
    let server = numeric(server).ok_or_else(|| not_numeric(field, Side::Server))?;
    Ok(match op {
        Comparison::Gt => client > server,
        Comparison::Ge => client >= server,
        Comparison::Lt => client < server,
        Comparison::Le => client <= server,
        Comparison::Eq | Comparison::Ne => false,
    })
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn missing(field: &str, side: Side) -> ConditionError {
    ConditionError::MissingField {
        field: field.to_string(),
        side: side.as_str(),
    }
}

fn not_numeric(field: &str, side: Side) -> ConditionError {
    ConditionError::NotNumeric {
        field: field.to_string(),
        side: side.as_str(),
    }
}

/// Take one side verbatim
pub fn take_side(
    ctx: &RuleContext<'_>,
    side: Side,
    confidence: f64,
    note: impl Into<String>,
) -> RuleOutcome {
    RuleOutcome::Resolved {
        data: ctx.snapshot(side).clone(),
        action: Resolution::from(side).into(),
        confidence,
        note: note.into(),
    }
}

/// Whole-record smart merge, repair notes folded into the outcome note
pub fn smart_merge(ctx: &RuleContext<'_>, confidence: f64) -> RuleOutcome {
    let merged = merge_record(ctx.client(), ctx.server(), ctx.diffs, ctx.config);
    let note = if merged.notes.is_empty() {
        "smart merge".to_string()
    } else {
        format!("smart merge ({})", merged.notes.join("; "))
    };
    RuleOutcome::Resolved {
        data: merged.record,
        action: ResolutionAction::Merge,
        confidence,
        note,
    }
}

/// Dispatch a rule action
pub fn apply_action(action: RuleAction, ctx: &RuleContext<'_>) -> Result<RuleOutcome> {
    match action {
        RuleAction::ClientWins => Ok(take_side(ctx, Side::Client, RULE_CONFIDENCE, "client wins")),
        RuleAction::ServerWins => Ok(take_side(ctx, Side::Server, RULE_CONFIDENCE, "server wins")),
        RuleAction::Merge => Ok(smart_merge(ctx, MERGE_CONFIDENCE)),
        RuleAction::UserPrompt => Ok(RuleOutcome::RequiresInput {
            note: AWAITING_INPUT_NOTE.to_string(),
        }),
        RuleAction::Custom(handler) => handlers::run(handler, ctx),
    }
}

/// Evaluate a strategy's rules in precedence order.
///
/// A condition that fails to evaluate is logged and treated as false. When
/// nothing matches, the server snapshot wins.
pub fn evaluate_strategy(
    strategy: &ResolutionStrategy,
    ctx: &RuleContext<'_>,
) -> Result<RuleDecision> {
    for rule in strategy.rules() {
        let matched = match rule.condition.evaluate(ctx) {
            Ok(matched) => matched,
            Err(error) => {
                tracing::warn!(
                    strategy = %strategy.id,
                    rule = %rule.id,
                    conflict_id = %ctx.conflict.id,
                    "Rule condition failed, treating as no match: {error}"
                );
                false
            }
        };
        tracing::debug!(strategy = %strategy.id, rule = %rule.id, matched, "Evaluated rule");
        if !matched {
            continue;
        }

        let outcome = apply_action(rule.action, ctx)?
            .prefix_note(&format!("rule '{}' ({})", rule.id, rule.action.as_str()));
        return Ok(RuleDecision {
            rule_id: Some(rule.id.clone()),
            outcome,
        });
    }

    tracing::info!(
        strategy = %strategy.id,
        conflict_id = %ctx.conflict.id,
        "No rule matched, falling back to server wins"
    );
    Ok(RuleDecision {
        rule_id: None,
        outcome: take_side(ctx, Side::Server, FALLBACK_CONFIDENCE, FALLBACK_NOTE),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute_diffs;
    use crate::models::PrecedenceRule;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn conflict(client: Value, server: Value) -> Conflict {
        Conflict::new(
            "account",
            "a1",
            RecordSnapshot::from_value(client).unwrap(),
            RecordSnapshot::from_value(server).unwrap(),
        )
    }

    fn decide(
        strategy: &ResolutionStrategy,
        conflict: &Conflict,
        pattern: Option<&UserPattern>,
    ) -> RuleDecision {
        let config = EngineConfig::default();
        let diffs = compute_diffs(&conflict.client, &conflict.server, &config);
        let ctx = RuleContext {
            conflict,
            diffs: &diffs,
            pattern,
            prediction: None,
            config: &config,
        };
        evaluate_strategy(strategy, &ctx).unwrap()
    }

    fn strategy(rules: Vec<PrecedenceRule>) -> ResolutionStrategy {
        ResolutionStrategy::new("test", "Test", "", rules)
    }

    #[test]
    fn test_first_matching_rule_by_priority_wins() {
        let conflict = conflict(json!({"a": 1, "updatedAt": 2}), json!({"a": 2, "updatedAt": 1}));
        let strategy = strategy(vec![
            PrecedenceRule::new("server", 1, Condition::Always, RuleAction::ServerWins),
            PrecedenceRule::new(
                "client-newer",
                10,
                Condition::Newer { side: Side::Client },
                RuleAction::ClientWins,
            ),
        ]);
        let decision = decide(&strategy, &conflict, None);
        assert_eq!(decision.rule_id.as_deref(), Some("client-newer"));
        assert_eq!(decision.outcome.action(), ResolutionAction::Client);
    }

    #[test]
    fn test_no_match_falls_back_to_server_verbatim() {
        let conflict = conflict(json!({"a": 1, "updatedAt": 1}), json!({"a": 2, "b": 3, "updatedAt": 2}));
        let strategy = strategy(vec![PrecedenceRule::new(
            "never",
            1,
            Condition::Newer { side: Side::Client },
            RuleAction::ClientWins,
        )]);
        let decision = decide(&strategy, &conflict, None);
        assert_eq!(decision.rule_id, None);
        match decision.outcome {
            RuleOutcome::Resolved { data, action, note, .. } => {
                assert_eq!(data, conflict.server);
                assert_eq!(action, ResolutionAction::Server);
                assert_eq!(note, FALLBACK_NOTE);
            }
            RuleOutcome::RequiresInput { .. } => panic!("expected fallback resolution"),
        }
    }

    #[test]
    fn test_broken_condition_is_treated_as_false() {
        let conflict = conflict(json!({"limit": "high"}), json!({"limit": 5}));
        let strategy = strategy(vec![
            PrecedenceRule::new(
                "broken",
                10,
                Condition::FieldCompare {
                    field: "limit".to_string(),
                    op: Comparison::Gt,
                },
                RuleAction::ClientWins,
            ),
            PrecedenceRule::new(
                "no-timestamps",
                5,
                Condition::Newer { side: Side::Client },
                RuleAction::ClientWins,
            ),
            PrecedenceRule::new("merge", 1, Condition::Always, RuleAction::Merge),
        ]);
        let decision = decide(&strategy, &conflict, None);
        assert_eq!(decision.rule_id.as_deref(), Some("merge"));
    }

    #[test]
    fn test_condition_errors_are_reported() {
        let conflict = conflict(json!({"limit": "high"}), json!({}));
        let config = EngineConfig::default();
        let ctx = RuleContext {
            conflict: &conflict,
            diffs: &[],
            pattern: None,
            prediction: None,
            config: &config,
        };
        let compare = Condition::FieldCompare {
            field: "limit".to_string(),
            op: Comparison::Lt,
        };
        assert!(matches!(
            compare.evaluate(&ctx),
            Err(ConditionError::MissingField { side: "server", .. })
        ));
        assert!(matches!(
            Condition::Newer { side: Side::Server }.evaluate(&ctx),
            Err(ConditionError::MissingTimestamp(_))
        ));
    }

    #[test]
    fn test_composite_and_pattern_conditions() {
        let conflict = conflict(json!({"status": "open"}), json!({"status": "closed"}))
            .with_metadata(serde_json::from_value(json!({"source": "mobile"})).unwrap());
        let pattern = UserPattern {
            preferred_resolution: Resolution::Client,
            confidence: 0.8,
            frequency: 4,
            last_used: 0,
        };
        let condition = Condition::All {
            conditions: vec![
                Condition::Metadata {
                    key: "source".to_string(),
                    value: json!("mobile"),
                },
                Condition::Pattern {
                    min_confidence: 0.7,
                    preferred: Some(Resolution::Client),
                },
                Condition::Not {
                    condition: Box::new(Condition::Custom {
                        predicate: Predicate::PendingDelete,
                    }),
                },
            ],
        };
        let strategy = strategy(vec![PrecedenceRule::new("learned", 1, condition, RuleAction::ClientWins)]);

        assert_eq!(decide(&strategy, &conflict, Some(&pattern)).rule_id.as_deref(), Some("learned"));
        assert_eq!(decide(&strategy, &conflict, None).rule_id, None);
    }

    #[test]
    fn test_pattern_condition_needs_confidence_above_bound() {
        let conflict = conflict(json!({"status": "open"}), json!({"status": "closed"}));
        let strategy = strategy(vec![PrecedenceRule::new(
            "learned",
            1,
            Condition::Pattern {
                min_confidence: 0.7,
                preferred: None,
            },
            RuleAction::ClientWins,
        )]);
        let mut pattern = UserPattern {
            preferred_resolution: Resolution::Client,
            confidence: 0.7,
            frequency: 3,
            last_used: 0,
        };

        assert_eq!(decide(&strategy, &conflict, Some(&pattern)).rule_id, None);
        pattern.confidence = 0.71;
        assert_eq!(
            decide(&strategy, &conflict, Some(&pattern)).rule_id.as_deref(),
            Some("learned")
        );
    }

    #[test]
    fn test_user_prompt_requires_input() {
        let conflict = conflict(json!({"a": 1}), json!({"a": 2}));
        let strategy = strategy(vec![PrecedenceRule::new(
            "ask",
            1,
            Condition::Always,
            RuleAction::UserPrompt,
        )]);
        let decision = decide(&strategy, &conflict, None);
        assert!(matches!(decision.outcome, RuleOutcome::RequiresInput { .. }));
        assert_eq!(decision.outcome.action(), ResolutionAction::Skip);
    }
}

//! Built-in resolution strategies and the scenarios that verify them

use serde_json::{json, Value};

use crate::models::{
    Complexity, Condition, CustomHandler, ExpectedOutcome, FieldMap, Frequency, PendingOperation,
    PrecedenceRule, Predicate, RecordSnapshot, Resolution, ResolutionAction, ResolutionStrategy,
    RuleAction, ScenarioMetadata, Severity, Side, TestScenario,
};

pub const TIMESTAMP: &str = "timestamp";
pub const CLIENT_WINS: &str = "client_wins";
pub const SERVER_WINS: &str = "server_wins";
pub const SMART_MERGE: &str = "smart_merge";
pub const USER_PATTERN: &str = "user_pattern";
pub const BUSINESS_RULES: &str = "business_rules";
pub const COMPLIANCE: &str = "compliance";
pub const INTEGRITY_REPAIR: &str = "integrity_repair";
pub const ADAPTIVE: &str = "adaptive";
pub const MANUAL: &str = "manual";

/// Strategy every live resolution uses unless the caller names another
pub const DEFAULT_STRATEGY: &str = TIMESTAMP;

fn always(id: &str, action: RuleAction) -> PrecedenceRule {
    PrecedenceRule::new(id, 0, Condition::Always, action)
}

pub fn strategies() -> Vec<ResolutionStrategy> {
    vec![
        ResolutionStrategy::new(
            TIMESTAMP,
            "Last write wins",
            "The newer record wins; equal timestamps go to the configured winner",
            vec![
                PrecedenceRule::new(
                    "client-newer",
                    20,
                    Condition::Newer { side: Side::Client },
                    RuleAction::ClientWins,
                ),
                PrecedenceRule::new(
                    "server-newer",
                    10,
                    Condition::Newer { side: Side::Server },
                    RuleAction::ServerWins,
                ),
            ],
        ),
        ResolutionStrategy::new(
            CLIENT_WINS,
            "Client wins",
            "Keep the offline edit",
            vec![always("client", RuleAction::ClientWins)],
        ),
        ResolutionStrategy::new(
            SERVER_WINS,
            "Server wins",
            "Discard the offline edit",
            vec![always("server", RuleAction::ServerWins)],
        ),
        ResolutionStrategy::new(
            SMART_MERGE,
            "Smart merge",
            "Combine both records field by field",
            vec![
                PrecedenceRule::new(
                    "client-additions",
                    10,
                    Condition::Custom {
                        predicate: Predicate::ClientOnlyAdditions,
                    },
                    RuleAction::ClientWins,
                ),
                always("merge", RuleAction::Merge),
            ],
        ),
        ResolutionStrategy::new(
            USER_PATTERN,
            "Learned preference",
            "Apply the user's confident learned preference, else the newer record",
            vec![always(
                "learned",
                RuleAction::Custom(CustomHandler::UserPattern),
            )],
        ),
        ResolutionStrategy::new(
            BUSINESS_RULES,
            "Business rules",
            "Prefer the side that satisfies record-level business rules",
            vec![
                PrecedenceRule::new(
                    "pending-delete",
                    30,
                    Condition::Custom {
                        predicate: Predicate::PendingDelete,
                    },
                    RuleAction::UserPrompt,
                ),
                PrecedenceRule::new(
                    "owner-mismatch",
                    20,
                    Condition::Custom {
                        predicate: Predicate::OwnerMismatch,
                    },
                    RuleAction::ServerWins,
                ),
                always(
                    "validate",
                    RuleAction::Custom(CustomHandler::BusinessRuleValidation),
                ),
            ],
        ),
        ResolutionStrategy::new(
            COMPLIANCE,
            "Compliance check",
            "Refuse to persist records that violate business rules on both sides",
            vec![always(
                "compliance",
                RuleAction::Custom(CustomHandler::ComplianceCheck),
            )],
        ),
        ResolutionStrategy::new(
            INTEGRITY_REPAIR,
            "Integrity repair",
            "Smart merge, then repair missing required and malformed monetary fields",
            vec![always(
                "repair",
                RuleAction::Custom(CustomHandler::IntegrityRepair),
            )],
        ),
        ResolutionStrategy::new(
            ADAPTIVE,
            "Adaptive",
            "Learned preference, then confident prediction, else ask",
            vec![
                PrecedenceRule::new(
                    "critical",
                    40,
                    Condition::Custom {
                        predicate: Predicate::HasCriticalDiff,
                    },
                    RuleAction::UserPrompt,
                ),
                PrecedenceRule::new(
                    "learned",
                    30,
                    Condition::Pattern {
                        min_confidence: 0.7,
                        preferred: None,
                    },
                    RuleAction::Custom(CustomHandler::UserPattern),
                ),
                PrecedenceRule::new(
                    "predicted-client",
                    20,
                    Condition::Prediction {
                        min_confidence: 0.85,
                        resolution: Some(Resolution::Client),
                    },
                    RuleAction::ClientWins,
                ),
                PrecedenceRule::new(
                    "predicted-server",
                    20,
                    Condition::Prediction {
                        min_confidence: 0.85,
                        resolution: Some(Resolution::Server),
                    },
                    RuleAction::ServerWins,
                ),
                PrecedenceRule::new(
                    "predicted-merge",
                    10,
                    Condition::Prediction {
                        min_confidence: 0.7,
                        resolution: Some(Resolution::Merge),
                    },
                    RuleAction::Merge,
                ),
                always("ask", RuleAction::UserPrompt),
            ],
        ),
        ResolutionStrategy::new(
            MANUAL,
            "Manual",
            "Always hand the conflict to a human",
            vec![always("ask", RuleAction::UserPrompt)],
        ),
    ]
}

fn snapshot(value: Value) -> RecordSnapshot {
    match value {
        Value::Object(fields) => RecordSnapshot::new(fields),
        _ => RecordSnapshot::default(),
    }
}

struct ScenarioSeed {
    id: &'static str,
    name: &'static str,
    strategy: &'static str,
    entity_type: &'static str,
    client: Value,
    server: Value,
    expected: ExpectedOutcome,
    metadata: ScenarioMetadata,
}

impl From<ScenarioSeed> for TestScenario {
    fn from(seed: ScenarioSeed) -> Self {
        Self {
            id: seed.id.to_string(),
            name: seed.name.to_string(),
            strategy_id: Some(seed.strategy.to_string()),
            entity_type: seed.entity_type.to_string(),
            user_id: None,
            operation: PendingOperation::Update,
            client: snapshot(seed.client),
            server: snapshot(seed.server),
            context: FieldMap::new(),
            expected: seed.expected,
            metadata: seed.metadata,
        }
    }
}

fn resolved(data: Value, action: ResolutionAction) -> ExpectedOutcome {
    ExpectedOutcome::Resolved {
        data: snapshot(data),
        action: Some(action),
    }
}

const fn metadata(complexity: Complexity, frequency: Frequency, criticality: Severity) -> ScenarioMetadata {
    ScenarioMetadata {
        complexity,
        frequency,
        criticality,
    }
}

const T: i64 = 1_700_000_000_000;

pub fn scenarios() -> Vec<TestScenario> {
    let specs = vec![
        ScenarioSeed {
            id: "client-newer-balance",
            name: "Client-newer timestamp wins",
            strategy: TIMESTAMP,
            entity_type: "account",
            client: json!({"id": "a1", "balance": 1500, "updatedAt": T}),
            server: json!({"id": "a1", "balance": 1450, "updatedAt": T - 1000}),
            expected: resolved(
                json!({"id": "a1", "balance": 1500, "updatedAt": T}),
                ResolutionAction::Client,
            ),
            metadata: metadata(Complexity::Simple, Frequency::Common, Severity::Critical),
        },
        ScenarioSeed {
            id: "server-newer-balance",
            name: "Server-newer timestamp wins",
            strategy: TIMESTAMP,
            entity_type: "account",
            client: json!({"id": "a1", "balance": 1500, "updatedAt": T - 1000}),
            server: json!({"id": "a1", "balance": 1450, "updatedAt": T}),
            expected: resolved(
                json!({"id": "a1", "balance": 1450, "updatedAt": T}),
                ResolutionAction::Server,
            ),
            metadata: metadata(Complexity::Simple, Frequency::Common, Severity::Critical),
        },
        ScenarioSeed {
            id: "equal-timestamps-server",
            name: "Equal timestamps go to the server",
            strategy: TIMESTAMP,
            entity_type: "account",
            client: json!({"id": "a1", "name": "Checking", "updatedAt": T}),
            server: json!({"id": "a1", "name": "Main checking", "updatedAt": T}),
            expected: resolved(
                json!({"id": "a1", "name": "Main checking", "updatedAt": T}),
                ResolutionAction::Server,
            ),
            metadata: metadata(Complexity::Simple, Frequency::Rare, Severity::High),
        },
        ScenarioSeed {
            id: "tag-union",
            name: "Tags merge as a union",
            strategy: SMART_MERGE,
            entity_type: "goal",
            client: json!({"id": "g1", "tags": ["travel", "japan"], "updatedAt": T}),
            server: json!({"id": "g1", "tags": ["japan", "2025"], "updatedAt": T - 500}),
            expected: resolved(
                json!({"id": "g1", "tags": ["travel", "japan", "2025"]}),
                ResolutionAction::Merge,
            ),
            metadata: metadata(Complexity::Moderate, Frequency::Common, Severity::Low),
        },
        ScenarioSeed {
            id: "notes-concatenation",
            name: "Edited notes are concatenated",
            strategy: SMART_MERGE,
            entity_type: "transaction",
            client: json!({"id": "t1", "notes": "split with Sam", "updatedAt": T}),
            server: json!({"id": "t1", "notes": "reimbursed", "updatedAt": T - 500}),
            expected: resolved(
                json!({"id": "t1", "notes": "split with Sam | reimbursed"}),
                ResolutionAction::Merge,
            ),
            metadata: metadata(Complexity::Moderate, Frequency::Occasional, Severity::Low),
        },
        ScenarioSeed {
            id: "nested-preferences",
            name: "Nested settings merge recursively",
            strategy: SMART_MERGE,
            entity_type: "settings",
            client: json!({
                "id": "s1",
                "preferences": {"alerts": {"email": true, "sms": true}, "theme": "dark"}
            }),
            server: json!({
                "id": "s1",
                "preferences": {"alerts": {"email": false}, "theme": "light"}
            }),
            expected: resolved(
                json!({
                    "id": "s1",
                    "preferences": {"alerts": {"email": false, "sms": true}, "theme": "light"}
                }),
                ResolutionAction::Merge,
            ),
            metadata: metadata(Complexity::Complex, Frequency::Rare, Severity::Low),
        },
        ScenarioSeed {
            id: "invalid-client-goal",
            name: "Business rules reject a negative goal amount",
            strategy: BUSINESS_RULES,
            entity_type: "goal",
            client: json!({"id": "g1", "currentAmount": -25, "updatedAt": T}),
            server: json!({"id": "g1", "currentAmount": 40, "updatedAt": T - 500}),
            expected: resolved(
                json!({"id": "g1", "currentAmount": 40}),
                ResolutionAction::Server,
            ),
            metadata: metadata(Complexity::Moderate, Frequency::Rare, Severity::High),
        },
        ScenarioSeed {
            id: "integrity-coercion",
            name: "Integrity repair coerces monetary strings",
            strategy: INTEGRITY_REPAIR,
            entity_type: "goal",
            client: json!({"id": "g1", "currentAmount": "120.50", "tags": ["a"]}),
            server: json!({"id": "g1", "tags": ["b"]}),
            expected: resolved(
                json!({"id": "g1", "currentAmount": 120.5, "tags": ["a", "b"]}),
                ResolutionAction::Merge,
            ),
            metadata: metadata(Complexity::Complex, Frequency::Rare, Severity::Medium),
        },
        ScenarioSeed {
            id: "manual-prompt",
            name: "Manual strategy asks a human",
            strategy: MANUAL,
            entity_type: "account",
            client: json!({"id": "a1", "balance": 1500}),
            server: json!({"id": "a1", "balance": 1450}),
            expected: ExpectedOutcome::RequiresInput,
            metadata: metadata(Complexity::Simple, Frequency::Occasional, Severity::Critical),
        },
    ];

    specs.into_iter().map(TestScenario::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn strategy_ids_are_unique() {
        let strategies = strategies();
        let ids: HashSet<&str> = strategies.iter().map(|strategy| strategy.id.as_str()).collect();
        assert_eq!(ids.len(), strategies.len());
        assert!(ids.contains(DEFAULT_STRATEGY));
    }

    #[test]
    fn built_in_strategies_survive_validation() {
        for strategy in strategies() {
            let reloaded = ResolutionStrategy::try_from(strategy.to_definition()).unwrap();
            assert_eq!(reloaded.rules(), strategy.rules());
        }
    }

    #[test]
    fn every_scenario_names_a_built_in_strategy() {
        let ids: HashSet<String> = strategies().into_iter().map(|strategy| strategy.id).collect();
        for scenario in scenarios() {
            assert!(ids.contains(scenario.strategy_id.as_deref().unwrap_or_default()));
        }
    }
}

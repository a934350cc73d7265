//! Resolution strategy model
//!
//! A strategy is an ordered list of precedence rules. Rule conditions are a
//! closed set of condition kinds and custom actions are a closed set of
//! handlers, so a malformed strategy is rejected when it is loaded rather
//! than when a conflict happens to reach the broken rule.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::str::FromStr;

use super::conflict::{Resolution, ResolutionAction, Side};
use crate::error::{Error, Result};

/// Comparison applied between the client and server value of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Named predicates that need more than a single field lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// The client holds every server field unchanged and adds at least one
    ClientOnlyAdditions,
    /// The client's pending operation is a delete
    PendingDelete,
    /// Client and server disagree on the owning user
    OwnerMismatch,
    /// At least one field diff is critical
    HasCriticalDiff,
}

/// Boolean condition of a precedence rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Always,
    /// One side's field equals a literal
    FieldEquals {
        side: Side,
        field: String,
        value: Value,
    },
    /// The field differs between the two sides
    FieldDiffers { field: String },
    /// Numeric comparison `client[field] <op> server[field]`
    FieldCompare { field: String, op: Comparison },
    /// The given side holds the newer record; ties go to the configured winner
    Newer { side: Side },
    /// A learned pattern exists with confidence above this bound (and preference)
    Pattern {
        min_confidence: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preferred: Option<Resolution>,
    },
    /// The predictor is at least this confident (in this resolution)
    Prediction {
        min_confidence: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resolution: Option<Resolution>,
    },
    /// Caller metadata key equals a literal
    Metadata { key: String, value: Value },
    Custom { predicate: Predicate },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl Condition {
    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Self::FieldEquals { field, .. }
            | Self::FieldDiffers { field }
            | Self::FieldCompare { field, .. } => {
                if field.trim().is_empty() {
                    return Err("condition field must not be empty".to_string());
                }
                Ok(())
            }
            Self::Pattern { min_confidence, .. } | Self::Prediction { min_confidence, .. } => {
                if (0.0..=1.0).contains(min_confidence) {
                    Ok(())
                } else {
                    Err(format!("min_confidence {min_confidence} is outside 0..=1"))
                }
            }
            Self::Metadata { key, .. } => {
                if key.trim().is_empty() {
                    return Err("metadata key must not be empty".to_string());
                }
                Ok(())
            }
            Self::All { conditions } | Self::Any { conditions } => {
                if conditions.is_empty() {
                    return Err("all/any conditions must not be empty".to_string());
                }
                conditions.iter().try_for_each(Self::validate)
            }
            Self::Not { condition } => condition.validate(),
            Self::Always | Self::Newer { .. } | Self::Custom { .. } => Ok(()),
        }
    }
}

/// Custom resolution handlers, each implementing the conflict -> resolution contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomHandler {
    BusinessRuleValidation,
    IntegrityRepair,
    ComplianceCheck,
    /// Apply the user's learned preference when it is confident enough
    UserPattern,
}

impl CustomHandler {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BusinessRuleValidation => "business_rule_validation",
            Self::IntegrityRepair => "integrity_repair",
            Self::ComplianceCheck => "compliance_check",
            Self::UserPattern => "user_pattern",
        }
    }
}

impl FromStr for CustomHandler {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "business_rule_validation" => Ok(Self::BusinessRuleValidation),
            "integrity_repair" => Ok(Self::IntegrityRepair),
            "compliance_check" => Ok(Self::ComplianceCheck),
            "user_pattern" | "resolve_by_user_pattern" => Ok(Self::UserPattern),
            other => Err(format!("unknown custom handler '{other}'")),
        }
    }
}

/// Action dispatched when a rule's condition holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    ClientWins,
    ServerWins,
    Merge,
    UserPrompt,
    Custom(CustomHandler),
}

impl RuleAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientWins => "client_wins",
            Self::ServerWins => "server_wins",
            Self::Merge => "merge",
            Self::UserPrompt => "user_prompt",
            Self::Custom(_) => "custom",
        }
    }

    /// Parse the stored `action` + optional `handler` pair
    pub fn parse(action: &str, handler: Option<&str>) -> std::result::Result<Self, String> {
        let handler = handler.map(str::trim).filter(|name| !name.is_empty());
        let parsed = match action.trim() {
            "client_wins" => Self::ClientWins,
            "server_wins" => Self::ServerWins,
            "merge" => Self::Merge,
            "user_prompt" => Self::UserPrompt,
            "custom" => {
                let name = handler.ok_or_else(|| "custom action requires a handler".to_string())?;
                return name.parse().map(Self::Custom);
            }
            other => return Err(format!("unknown action '{other}'")),
        };
        if let Some(name) = handler {
            return Err(format!(
                "handler '{name}' is only valid with the custom action, not '{}'",
                parsed.as_str()
            ));
        }
        Ok(parsed)
    }

    pub const fn handler(self) -> Option<CustomHandler> {
        match self {
            Self::Custom(handler) => Some(handler),
            _ => None,
        }
    }
}

/// One condition -> action pair of a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecedenceRule {
    pub id: String,
    pub condition: Condition,
    pub action: RuleAction,
    pub priority: i32,
}

impl PrecedenceRule {
    pub fn new(id: impl Into<String>, priority: i32, condition: Condition, action: RuleAction) -> Self {
        Self {
            id: id.into(),
            condition,
            action,
            priority,
        }
    }
}

/// Rolling performance counters, used only for reporting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub resolutions: u64,
    pub total_micros: u64,
    pub client: u64,
    pub server: u64,
    pub merge: u64,
    pub prompts: u64,
}

impl PerformanceProfile {
    pub fn record(&mut self, action: ResolutionAction, micros: u64) {
        self.resolutions += 1;
        self.total_micros = self.total_micros.saturating_add(micros);
        match action {
            ResolutionAction::Client => self.client += 1,
            ResolutionAction::Server => self.server += 1,
            ResolutionAction::Merge => self.merge += 1,
            ResolutionAction::Skip => self.prompts += 1,
        }
    }

    pub fn average_micros(&self) -> f64 {
        if self.resolutions == 0 {
            0.0
        } else {
            self.total_micros as f64 / self.resolutions as f64
        }
    }
}

/// Summary of the latest scenario harness run for a strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCoverage {
    pub scenarios_covered: usize,
    pub pass_rate: f64,
    /// Last run timestamp (Unix ms)
    #[serde(default)]
    pub last_run: Option<i64>,
}

/// A validated, ordered resolution strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionStrategy {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Entity types this strategy applies to; empty means all
    pub entity_types: Vec<String>,
    /// Rules sorted by descending priority, ties in declaration order
    rules: Vec<PrecedenceRule>,
    pub performance: PerformanceProfile,
    pub coverage: TestCoverage,
}

impl ResolutionStrategy {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        mut rules: Vec<PrecedenceRule>,
    ) -> Self {
        rules.sort_by_key(|rule| Reverse(rule.priority));
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            entity_types: Vec::new(),
            rules,
            performance: PerformanceProfile::default(),
            coverage: TestCoverage::default(),
        }
    }

    #[must_use]
    pub fn with_entity_types(mut self, entity_types: Vec<String>) -> Self {
        self.entity_types = entity_types;
        self
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[PrecedenceRule] {
        &self.rules
    }

    pub fn applies_to(&self, entity_type: &str) -> bool {
        self.entity_types.is_empty()
            || self
                .entity_types
                .iter()
                .any(|candidate| candidate == "*" || candidate.eq_ignore_ascii_case(entity_type))
    }

    /// Raw definition used for persistence
    pub fn to_definition(&self) -> StrategyDefinition {
        StrategyDefinition {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            entity_types: self.entity_types.clone(),
            rules: self
                .rules
                .iter()
                .map(|rule| RuleDefinition {
                    id: rule.id.clone(),
                    condition: rule.condition.clone(),
                    action: rule.action.as_str().to_string(),
                    handler: rule.action.handler().map(|handler| handler.as_str().to_string()),
                    priority: rule.priority,
                })
                .collect(),
        }
    }
}

/// Stored form of a strategy, as written by admins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub entity_types: Vec<String>,
    pub rules: Vec<RuleDefinition>,
}

/// Stored form of a precedence rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    pub id: String,
    pub condition: Condition,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

impl TryFrom<StrategyDefinition> for ResolutionStrategy {
    type Error = Error;

    fn try_from(definition: StrategyDefinition) -> Result<Self> {
        let id = definition.id.trim().to_string();
        if id.is_empty() {
            return Err(Error::invalid_strategy("<unnamed>", "strategy id must not be empty"));
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(definition.rules.len());
        for rule in definition.rules {
            let rule_id = rule.id.trim().to_string();
            if rule_id.is_empty() {
                return Err(Error::invalid_strategy(&id, "rule id must not be empty"));
            }
            if !seen.insert(rule_id.clone()) {
                return Err(Error::invalid_strategy(
                    &id,
                    format!("duplicate rule id '{rule_id}'"),
                ));
            }
            let action = RuleAction::parse(&rule.action, rule.handler.as_deref())
                .map_err(|reason| Error::invalid_strategy(&id, format!("rule '{rule_id}': {reason}")))?;
            rule.condition
                .validate()
                .map_err(|reason| Error::invalid_strategy(&id, format!("rule '{rule_id}': {reason}")))?;
            rules.push(PrecedenceRule::new(rule_id, rule.priority, rule.condition, action));
        }

        let name = if definition.name.trim().is_empty() {
            id.clone()
        } else {
            definition.name.trim().to_string()
        };
        let entity_types = definition
            .entity_types
            .into_iter()
            .map(|entity_type| entity_type.trim().to_string())
            .filter(|entity_type| !entity_type.is_empty())
            .collect();

        Ok(Self::new(id, name, definition.description.trim(), rules).with_entity_types(entity_types))
    }
}

//! Test scenario model for the scenario harness

use serde::{Deserialize, Serialize};

use super::conflict::{PendingOperation, ResolutionAction, Severity};
use super::snapshot::{FieldMap, RecordSnapshot};

/// How complex a scenario is to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    #[default]
    Simple,
    Moderate,
    Complex,
}

/// How often the scenario shows up in real traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Rare,
    #[default]
    Occasional,
    Common,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioMetadata {
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub criticality: Severity,
}

/// What a scenario expects the pipeline to produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExpectedOutcome {
    Resolved {
        data: RecordSnapshot,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<ResolutionAction>,
    },
    RequiresInput,
}

/// Fixed input and expected output for one strategy check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestScenario {
    pub id: String,
    pub name: String,
    /// Strategy this scenario is pinned to; unpinned scenarios run against
    /// every strategy that applies to the entity type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub operation: PendingOperation,
    pub client: RecordSnapshot,
    pub server: RecordSnapshot,
    #[serde(default)]
    pub context: FieldMap,
    pub expected: ExpectedOutcome,
    #[serde(default)]
    pub metadata: ScenarioMetadata,
}

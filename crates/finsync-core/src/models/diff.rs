//! Field-level diff model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::conflict::{Resolution, Severity};

/// How a field differs between the two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Present on the client only
    Added,
    /// Present on the server only
    Removed,
    /// Present on both sides with different values
    Modified,
    /// Equal on both sides (never kept in a diff list)
    Unchanged,
}

/// How two values of a field are combined when `merge` is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Join two strings with a visible separator
    Concatenate,
    /// Arithmetic mean of two numbers
    Average,
    /// Take the later of two timestamps
    Latest,
    /// Deduplicated union of two arrays
    Union,
    /// Field-by-field merge of two objects
    Recursive,
    /// Monetary value; the side is chosen by the rule engine, never averaged
    DeferToRule,
    /// No combination exists; keep the client value and note the repair
    ClientFallback,
}

impl MergeStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Concatenate => "concatenate",
            Self::Average => "average",
            Self::Latest => "latest",
            Self::Union => "union",
            Self::Recursive => "recursive",
            Self::DeferToRule => "defer_to_rule",
            Self::ClientFallback => "client_fallback",
        }
    }
}

/// One field's comparison result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_value: Option<Value>,
    pub diff_type: DiffType,
    pub severity: Severity,
    /// `None` when neither side can be preferred on the available evidence
    #[serde(default)]
    pub suggested_resolution: Option<Resolution>,
    pub merge_strategy: MergeStrategy,
}

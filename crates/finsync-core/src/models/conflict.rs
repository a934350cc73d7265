//! Conflict and resolution record models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::diff::Diff;
use super::pattern::PatternKey;
use super::snapshot::{FieldMap, RecordSnapshot};

/// A unique identifier for a conflict, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Create a new unique conflict ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Severity of a diff or a whole conflict, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Conflict category assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictCategory {
    #[default]
    Data,
    Schema,
    Permission,
    BusinessRule,
}

impl ConflictCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Schema => "schema",
            Self::Permission => "permission",
            Self::BusinessRule => "business_rule",
        }
    }
}

/// One side of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

/// A resolution that can be suggested or learned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Client,
    Server,
    Merge,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Merge => "merge",
        }
    }

    /// The side this resolution picks outright; `None` for a merge
    pub const fn side(self) -> Option<Side> {
        match self {
            Self::Client => Some(Side::Client),
            Self::Server => Some(Side::Server),
            Self::Merge => None,
        }
    }
}

impl From<Side> for Resolution {
    fn from(side: Side) -> Self {
        match side {
            Side::Client => Self::Client,
            Side::Server => Self::Server,
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            "merge" => Ok(Self::Merge),
            other => Err(format!("unknown resolution '{other}'")),
        }
    }
}

/// Action recorded in a resolution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Client,
    Server,
    Merge,
    /// Nothing was applied (e.g. waiting for a human decision)
    Skip,
}

impl ResolutionAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Merge => "merge",
            Self::Skip => "skip",
        }
    }

    /// The learnable resolution behind this action, if any
    pub const fn resolution(self) -> Option<Resolution> {
        match self {
            Self::Client => Some(Resolution::Client),
            Self::Server => Some(Resolution::Server),
            Self::Merge => Some(Resolution::Merge),
            Self::Skip => None,
        }
    }
}

impl From<Resolution> for ResolutionAction {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Client => Self::Client,
            Resolution::Server => Self::Server,
            Resolution::Merge => Self::Merge,
        }
    }
}

/// Who produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    User,
    #[default]
    Auto,
    System,
}

impl ResolvedBy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Auto => "auto",
            Self::System => "system",
        }
    }
}

impl FromStr for ResolvedBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "auto" => Ok(Self::Auto),
            "system" => Ok(Self::System),
            other => Err(format!("unknown resolver '{other}'")),
        }
    }
}

/// The client's pending operation on the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOperation {
    Create,
    #[default]
    Update,
    Delete,
}

/// Immutable audit entry appended for every resolution outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    /// Resolution timestamp (Unix ms)
    pub timestamp: i64,
    pub action: ResolutionAction,
    pub resolved_by: ResolvedBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_data: Option<RecordSnapshot>,
    /// Confidence in the chosen action (0-1)
    pub confidence: f64,
    pub note: String,
    /// Set once the transport reports the resolved record persisted remotely
    #[serde(default)]
    pub durable: bool,
}

/// The unit of resolution: two divergent snapshots of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub entity_type: String,
    pub entity_id: String,
    /// Owner of the pending client change; keys the learned patterns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub operation: PendingOperation,
    pub client: RecordSnapshot,
    pub server: RecordSnapshot,
    /// Arbitrary caller metadata visible to rule conditions
    #[serde(default)]
    pub metadata: FieldMap,
    #[serde(default)]
    pub category: ConflictCategory,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub auto_resolvable: bool,
    #[serde(default)]
    pub suggested_resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_merge_suggestion: Option<RecordSnapshot>,
    /// Diffs from the latest classification pass
    #[serde(default)]
    pub diffs: Vec<Diff>,
    #[serde(default)]
    pub resolution_history: Vec<ResolutionRecord>,
    #[serde(default)]
    pub attempts: u32,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl Conflict {
    /// Create a new, unclassified conflict
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        client: RecordSnapshot,
        server: RecordSnapshot,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: ConflictId::new(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            user_id: None,
            operation: PendingOperation::default(),
            client,
            server,
            metadata: FieldMap::new(),
            category: ConflictCategory::default(),
            severity: Severity::default(),
            auto_resolvable: false,
            suggested_resolution: None,
            smart_merge_suggestion: None,
            diffs: Vec::new(),
            resolution_history: Vec::new(),
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a conflict only when the two snapshots actually diverge.
    ///
    /// A pending delete always conflicts with an existing server record.
    #[must_use]
    pub fn detect(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        client: RecordSnapshot,
        server: RecordSnapshot,
        operation: PendingOperation,
    ) -> Option<Self> {
        if client == server && operation != PendingOperation::Delete {
            return None;
        }
        Some(Self::new(entity_type, entity_id, client, server).with_operation(operation))
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub const fn with_operation(mut self, operation: PendingOperation) -> Self {
        self.operation = operation;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: FieldMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Conflict type used for pattern learning and bulk filtering
    pub fn conflict_type(&self) -> String {
        format!("{}:{}", self.entity_type, self.category.as_str())
    }

    /// Pattern key for this conflict, if it has an owning user
    pub fn pattern_key(&self) -> Option<PatternKey> {
        self.user_id
            .as_deref()
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(|user| PatternKey::new(user, self.conflict_type()))
    }

    pub fn last_resolution(&self) -> Option<&ResolutionRecord> {
        self.resolution_history.last()
    }

    /// Whether the latest resolution actually applied a side or a merge
    pub fn is_resolved(&self) -> bool {
        self.last_resolution()
            .is_some_and(|record| record.action != ResolutionAction::Skip)
    }

    /// Timestamp of the latest resolution entry
    pub fn last_resolved_at(&self) -> Option<i64> {
        self.last_resolution().map(|record| record.timestamp)
    }

    /// Append to the audit trail; history is never rewritten
    pub fn push_resolution(&mut self, record: ResolutionRecord) {
        self.updated_at = self.updated_at.max(record.timestamp);
        self.resolution_history.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> RecordSnapshot {
        RecordSnapshot::from_value(value).unwrap()
    }

    #[test]
    fn test_conflict_id_parse() {
        let id = ConflictId::new();
        let parsed: ConflictId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_detect_skips_identical_snapshots() {
        let record = snapshot(json!({"id": "a1", "balance": 10}));
        assert!(Conflict::detect(
            "account",
            "a1",
            record.clone(),
            record.clone(),
            PendingOperation::Update
        )
        .is_none());

        let deleted = Conflict::detect("account", "a1", record.clone(), record, PendingOperation::Delete);
        assert!(deleted.is_some());
    }

    #[test]
    fn test_pattern_key_requires_user() {
        let conflict = Conflict::new(
            "account",
            "a1",
            snapshot(json!({"id": "a1"})),
            snapshot(json!({"id": "a1", "name": "x"})),
        );
        assert!(conflict.pattern_key().is_none());

        let conflict = conflict.with_user("u1");
        let key = conflict.pattern_key().unwrap();
        assert_eq!(key.user_id, "u1");
        assert_eq!(key.conflict_type, "account:data");
    }

    #[test]
    fn test_skip_does_not_count_as_resolved() {
        let mut conflict = Conflict::new(
            "account",
            "a1",
            snapshot(json!({"id": "a1"})),
            snapshot(json!({"id": "a1", "name": "x"})),
        );
        conflict.push_resolution(ResolutionRecord {
            timestamp: 10,
            action: ResolutionAction::Skip,
            resolved_by: ResolvedBy::System,
            strategy_id: None,
            rule_id: None,
            merged_data: None,
            confidence: 0.0,
            note: "awaiting input".to_string(),
            durable: false,
        });
        assert!(!conflict.is_resolved());
        assert_eq!(conflict.last_resolved_at(), Some(10));
    }
}

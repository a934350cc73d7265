//! Conflict classification: category, overall severity and the
//! auto-resolution gate.
//!
//! Classification is recomputed from the snapshots on every call and is the
//! only place `auto_resolvable` is ever set.

use crate::config::EngineConfig;
use crate::diff::compute_diffs;
use crate::merge::merge_record;
use crate::models::{Conflict, ConflictCategory, Diff, PendingOperation, Resolution, Severity};

/// Category rules, first match wins
pub fn categorize(conflict: &Conflict, config: &EngineConfig) -> ConflictCategory {
    if conflict.operation == PendingOperation::Delete {
        return ConflictCategory::BusinessRule;
    }
    if config.is_schema_entity(&conflict.entity_type) {
        return ConflictCategory::Schema;
    }
    if owner_mismatch(conflict, config) {
        return ConflictCategory::Permission;
    }
    ConflictCategory::Data
}

/// Both snapshots name an owner and the owners differ
pub fn owner_mismatch(conflict: &Conflict, config: &EngineConfig) -> bool {
    match (
        conflict.client.get(&config.owner_field),
        conflict.server.get(&config.owner_field),
    ) {
        (Some(client), Some(server)) => client != server,
        _ => false,
    }
}

/// Maximum diff severity, `low` for an empty list
pub fn overall_severity(diffs: &[Diff]) -> Severity {
    diffs
        .iter()
        .map(|diff| diff.severity)
        .max()
        .unwrap_or_default()
}

/// The conservative auto-resolution gate: not critical, at most one `high`
/// diff, and every diff carries a suggestion.
pub fn is_auto_resolvable(severity: Severity, diffs: &[Diff]) -> bool {
    let high_diffs = diffs
        .iter()
        .filter(|diff| diff.severity == Severity::High)
        .count();
    severity != Severity::Critical
        && high_diffs <= 1
        && diffs.iter().all(|diff| diff.suggested_resolution.is_some())
}

/// Conflict-level suggestion derived from the per-field suggestions
pub fn aggregate_suggestion(diffs: &[Diff]) -> Option<Resolution> {
    let mut suggestions = diffs.iter().filter_map(|diff| diff.suggested_resolution);
    let first = suggestions.next()?;
    if first != Resolution::Merge && suggestions.all(|suggestion| suggestion == first) {
        Some(first)
    } else {
        Some(Resolution::Merge)
    }
}

/// Run the diff engine and classify `conflict` in place
pub fn classify(conflict: &mut Conflict, config: &EngineConfig) {
    let diffs = compute_diffs(&conflict.client, &conflict.server, config);
    let severity = overall_severity(&diffs);
    let suggestion = aggregate_suggestion(&diffs);

    conflict.category = categorize(conflict, config);
    conflict.severity = severity;
    conflict.auto_resolvable = suggestion.is_some() && is_auto_resolvable(severity, &diffs);
    conflict.suggested_resolution = suggestion;
    conflict.smart_merge_suggestion = (!diffs.is_empty())
        .then(|| merge_record(&conflict.client, &conflict.server, &diffs, config).record);

    tracing::debug!(
        conflict_id = %conflict.id,
        category = conflict.category.as_str(),
        severity = severity.as_str(),
        auto_resolvable = conflict.auto_resolvable,
        diffs = diffs.len(),
        "Classified conflict"
    );
    conflict.diffs = diffs;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordSnapshot;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn conflict(entity_type: &str, client: Value, server: Value) -> Conflict {
        Conflict::new(
            entity_type,
            "x1",
            RecordSnapshot::from_value(client).unwrap(),
            RecordSnapshot::from_value(server).unwrap(),
        )
    }

    fn classified(mut conflict: Conflict) -> Conflict {
        classify(&mut conflict, &EngineConfig::default());
        conflict
    }

    #[test]
    fn test_pending_delete_is_business_rule_first() {
        let conflict = conflict(
            "account_schema",
            json!({"userId": "u1"}),
            json!({"userId": "u2"}),
        )
        .with_operation(PendingOperation::Delete);
        assert_eq!(classified(conflict).category, ConflictCategory::BusinessRule);
    }

    #[test]
    fn test_schema_then_permission_then_data() {
        let schema = conflict("field_meta", json!({"a": 1}), json!({"a": 2}));
        assert_eq!(classified(schema).category, ConflictCategory::Schema);

        let permission = conflict("goal", json!({"userId": "u1"}), json!({"userId": "u2"}));
        assert_eq!(classified(permission).category, ConflictCategory::Permission);

        let data = conflict("goal", json!({"userId": "u1", "a": 1}), json!({"userId": "u1", "a": 2}));
        assert_eq!(classified(data).category, ConflictCategory::Data);
    }

    #[test]
    fn test_critical_diff_blocks_auto_resolution() {
        let conflict = classified(conflict(
            "account",
            json!({"id": "a1", "balance": 1500, "updatedAt": 2000}),
            json!({"id": "a1", "balance": 1450, "updatedAt": 1000}),
        ));
        assert_eq!(conflict.severity, Severity::Critical);
        assert!(!conflict.auto_resolvable);
    }

    #[test]
    fn test_two_high_diffs_block_auto_resolution() {
        let conflict = classified(conflict(
            "bill",
            json!({"name": "Rent", "dueDate": "2024-02-01", "updatedAt": 2000}),
            json!({"name": "Lease", "dueDate": "2024-03-01", "updatedAt": 1000}),
        ));
        assert_eq!(conflict.severity, Severity::High);
        assert!(!conflict.auto_resolvable);
    }

    #[test]
    fn test_missing_suggestion_blocks_auto_resolution() {
        let conflict = classified(conflict("goal", json!({"color": "red"}), json!({"color": "blue"})));
        assert_eq!(conflict.diffs[0].suggested_resolution, None);
        assert!(!conflict.auto_resolvable);
    }

    #[test]
    fn test_low_severity_merge_is_auto_resolvable() {
        let conflict = classified(conflict(
            "goal",
            json!({"id": "g1", "tags": ["trip"], "notes": "a", "updatedAt": 2000}),
            json!({"id": "g1", "tags": ["travel"], "notes": "b", "updatedAt": 1000}),
        ));
        assert!(conflict.auto_resolvable);
        assert_eq!(conflict.suggested_resolution, Some(Resolution::Merge));
        assert_eq!(
            conflict.smart_merge_suggestion.unwrap().into_value(),
            json!({"id": "g1", "tags": ["trip", "travel"], "notes": "a | b", "updatedAt": 2000})
        );
    }

    #[test]
    fn test_aggregate_suggestion() {
        let mixed = classified(conflict(
            "goal",
            json!({"nickname": "a", "color": "red", "updatedAt": 2000}),
            json!({"color": "blue", "updatedAt": 2000}),
        ));
        // nickname -> client, color -> server on the timestamp tie
        assert_eq!(mixed.suggested_resolution, Some(Resolution::Merge));

        let server_only = classified(conflict(
            "goal",
            json!({"color": "red", "updatedAt": 1000}),
            json!({"color": "blue", "updatedAt": 1000}),
        ));
        assert_eq!(server_only.suggested_resolution, Some(Resolution::Server));
        assert_eq!(aggregate_suggestion(&[]), None);
    }
}

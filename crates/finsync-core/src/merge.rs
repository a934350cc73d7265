//! Per-field merge strategies and whole-record smart merge.
//!
//! Merging never fails: values with no meaningful combination fall back to
//! the client value and leave a repair note.

use serde_json::{Number, Value};

use crate::config::EngineConfig;
use crate::diff::newer_side;
use crate::models::{
    parse_timestamp, value_kind, Diff, FieldMap, MergeStrategy, RecordSnapshot, Resolution, Side,
};

/// Result of merging one field
#[derive(Debug, Clone, PartialEq)]
pub struct MergedValue {
    pub value: Value,
    pub note: Option<String>,
}

impl MergedValue {
    const fn clean(value: Value) -> Self {
        Self { value, note: None }
    }
}

/// Result of merging a whole record
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub record: RecordSnapshot,
    /// One entry per repair, fallback or monetary deferral
    pub notes: Vec<String>,
}

/// Combine the two values of one field using `strategy`.
///
/// `monetary_side` is the rule engine's explicit choice for fields tagged
/// [`MergeStrategy::DeferToRule`].
pub fn merge_values(
    field: &str,
    client: &Value,
    server: &Value,
    strategy: MergeStrategy,
    monetary_side: Side,
    config: &EngineConfig,
) -> MergedValue {
    if client == server {
        return MergedValue::clean(client.clone());
    }

    match (strategy, client, server) {
        (MergeStrategy::Concatenate, Value::String(a), Value::String(b)) => {
            MergedValue::clean(Value::String(concatenate(a, b, &config.merge_separator)))
        }
        (MergeStrategy::Average, Value::Number(a), Value::Number(b)) => average(field, a, b),
        (MergeStrategy::Latest, _, _) => latest(field, client, server),
        (MergeStrategy::Union, Value::Array(a), Value::Array(b)) => {
            MergedValue::clean(Value::Array(union(a, b)))
        }
        (MergeStrategy::Recursive, Value::Object(a), Value::Object(b)) => {
            MergedValue::clean(Value::Object(merge_objects(a, b)))
        }
        (MergeStrategy::DeferToRule, _, _) => {
            let value = match monetary_side {
                Side::Client => client.clone(),
                Side::Server => server.clone(),
            };
            MergedValue {
                value,
                note: Some(format!(
                    "{field}: monetary value taken from {} (never averaged)",
                    monetary_side.as_str()
                )),
            }
        }
        _ => client_fallback(field, client, server),
    }
}

fn concatenate(client: &str, server: &str, separator: &str) -> String {
    if client.is_empty() {
        return server.to_string();
    }
    if server.is_empty() {
        return client.to_string();
    }
    format!("{client}{separator}{server}")
}

fn average(field: &str, a: &Number, b: &Number) -> MergedValue {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        let sum = i128::from(a) + i128::from(b);
        if sum % 2 == 0 {
            if let Ok(mean) = i64::try_from(sum / 2) {
                return MergedValue::clean(Value::from(mean));
            }
        }
    }

    let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
        return client_fallback(field, &Value::Number(a.clone()), &Value::Number(b.clone()));
    };
    Number::from_f64((a + b) / 2.0).map_or_else(
        || client_fallback(field, &Value::from(a), &Value::from(b)),
        |mean| MergedValue::clean(Value::Number(mean)),
    )
}

fn latest(field: &str, client: &Value, server: &Value) -> MergedValue {
    match (parse_timestamp(client), parse_timestamp(server)) {
        (Some(a), Some(b)) if b > a => MergedValue::clean(server.clone()),
        (Some(_), Some(_)) => MergedValue::clean(client.clone()),
        _ => client_fallback(field, client, server),
    }
}

/// Deduplicated union: client items first, then server-only items
fn union(client: &[Value], server: &[Value]) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(client.len() + server.len());
    for item in client.iter().chain(server) {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

/// Recursive object merge: nested objects merge key by key, server wins
/// unresolved leaf conflicts, client fills keys the server lacks.
pub fn merge_objects(client: &FieldMap, server: &FieldMap) -> FieldMap {
    let mut merged = server.clone();
    for (key, client_value) in client {
        match merged.get_mut(key) {
            None => {
                merged.insert(key.clone(), client_value.clone());
            }
            Some(Value::Object(server_map)) => {
                if let Value::Object(client_map) = client_value {
                    *server_map = merge_objects(client_map, server_map);
                }
            }
            Some(_) => {}
        }
    }
    merged
}

fn client_fallback(field: &str, client: &Value, server: &Value) -> MergedValue {
    MergedValue {
        value: client.clone(),
        note: Some(format!(
            "{field}: cannot merge {} with {}, kept client value",
            value_kind(client),
            value_kind(server)
        )),
    }
}

/// Whole-record smart merge.
///
/// Starts from the server snapshot and overlays each diff's suggested
/// resolution; `merge`-tagged fields go through [`merge_values`]. Monetary
/// fields present on both sides take the side their diff suggests, falling
/// back to the newer side or the configured equal-timestamp winner.
pub fn merge_record(
    client: &RecordSnapshot,
    server: &RecordSnapshot,
    diffs: &[Diff],
    config: &EngineConfig,
) -> MergeOutcome {
    let fallback_side =
        newer_side(client, server, config).unwrap_or(config.equal_timestamp_winner);
    let mut record = server.fields().clone();
    let mut notes = Vec::new();

    for diff in diffs {
        let field = diff.field.as_str();
        if diff.merge_strategy == MergeStrategy::DeferToRule {
            if let (Some(client_value), Some(server_value)) = (&diff.client_value, &diff.server_value) {
                let side = diff
                    .suggested_resolution
                    .and_then(Resolution::side)
                    .unwrap_or(fallback_side);
                let merged = merge_values(
                    field,
                    client_value,
                    server_value,
                    MergeStrategy::DeferToRule,
                    side,
                    config,
                );
                notes.extend(merged.note);
                record.insert(diff.field.clone(), merged.value);
                continue;
            }
        }

        match diff.suggested_resolution {
            Some(Resolution::Client) => match &diff.client_value {
                Some(value) => {
                    record.insert(diff.field.clone(), value.clone());
                }
                None => {
                    record.remove(field);
                }
            },
            Some(Resolution::Server) => {}
            Some(Resolution::Merge) => match (&diff.client_value, &diff.server_value) {
                (Some(client_value), Some(server_value)) => {
                    let merged = merge_values(
                        field,
                        client_value,
                        server_value,
                        diff.merge_strategy,
                        fallback_side,
                        config,
                    );
                    if let Some(note) = merged.note {
                        notes.push(note);
                    }
                    record.insert(diff.field.clone(), merged.value);
                }
                (Some(client_value), None) => {
                    record.insert(diff.field.clone(), client_value.clone());
                }
                _ => {}
            },
            None => notes.push(format!(
                "{field}: no basis to prefer either side, kept server value"
            )),
        }
    }

    MergeOutcome {
        record: RecordSnapshot::new(record),
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute_diffs;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn snapshot(value: Value) -> RecordSnapshot {
        RecordSnapshot::from_value(value).unwrap()
    }

    fn merge(field: &str, client: Value, server: Value, strategy: MergeStrategy) -> MergedValue {
        merge_values(
            field,
            &client,
            &server,
            strategy,
            Side::Server,
            &EngineConfig::default(),
        )
    }

    #[test]
    fn test_strings_concatenate_with_separator() {
        let merged = merge("notes", json!("paid rent"), json!("split with Sam"), MergeStrategy::Concatenate);
        assert_eq!(merged.value, json!("paid rent | split with Sam"));
        assert!(merged.note.is_none());
    }

    #[test]
    fn test_numbers_average() {
        assert_eq!(merge("rate", json!(2), json!(4), MergeStrategy::Average).value, json!(3));
        assert_eq!(merge("rate", json!(1), json!(2), MergeStrategy::Average).value, json!(1.5));
    }

    #[test]
    fn test_monetary_values_never_averaged() {
        let merged = merge_values(
            "balance",
            &json!(1500),
            &json!(1450),
            MergeStrategy::DeferToRule,
            Side::Client,
            &EngineConfig::default(),
        );
        assert_eq!(merged.value, json!(1500));
        assert!(merged.note.unwrap().contains("never averaged"));
    }

    #[test]
    fn test_arrays_union_client_then_server() {
        let merged = merge("tags", json!(["a", "b", "a"]), json!(["c", "b"]), MergeStrategy::Union);
        assert_eq!(merged.value, json!(["a", "b", "c"]));
    }

    #[test]
    fn test_objects_merge_recursively() {
        let merged = merge(
            "settings",
            json!({"alerts": {"email": true, "sms": true}, "theme": "dark", "pin": 1}),
            json!({"alerts": {"email": false}, "theme": "light"}),
            MergeStrategy::Recursive,
        );
        assert_eq!(
            merged.value,
            json!({"alerts": {"email": false, "sms": true}, "theme": "light", "pin": 1})
        );
    }

    #[test]
    fn test_type_mismatch_keeps_client_with_note() {
        let merged = merge("limit", json!("unlimited"), json!(500), MergeStrategy::ClientFallback);
        assert_eq!(merged.value, json!("unlimited"));
        assert!(merged.note.unwrap().contains("kept client value"));
    }

    #[test]
    fn test_latest_takes_newer_timestamp() {
        let merged = merge(
            "updatedAt",
            json!("2024-01-01T00:00:00Z"),
            json!("2024-02-01T00:00:00Z"),
            MergeStrategy::Latest,
        );
        assert_eq!(merged.value, json!("2024-02-01T00:00:00Z"));
    }

    #[test]
    fn test_merge_with_itself_is_identity() {
        let config = EngineConfig::default();
        let record = snapshot(json!({
            "id": "a1", "balance": 12.5, "notes": "x", "tags": ["a", "a"], "meta": {"k": [1, 1]}
        }));
        let diffs = compute_diffs(&record, &record, &config);
        let outcome = merge_record(&record, &record, &diffs, &config);
        assert_eq!(outcome.record, record);
        assert!(outcome.notes.is_empty());

        for strategy in [
            MergeStrategy::Concatenate,
            MergeStrategy::Average,
            MergeStrategy::Union,
            MergeStrategy::Recursive,
        ] {
            let value = json!(["a", "a"]);
            assert_eq!(merge("f", value.clone(), value.clone(), strategy).value, value);
        }
    }

    #[test]
    fn test_record_merge_defers_monetary_fields() {
        let config = EngineConfig::default();
        let client = snapshot(json!({"id": "a1", "balance": 1500, "updatedAt": 2000}));
        let server = snapshot(json!({"id": "a1", "balance": 1450, "updatedAt": 1000}));
        let diffs = compute_diffs(&client, &server, &config);
        let outcome = merge_record(&client, &server, &diffs, &config);
        assert_eq!(outcome.record.get("balance"), Some(&json!(1500)));
        assert_eq!(
            outcome.notes,
            vec!["balance: monetary value taken from client (never averaged)".to_string()]
        );

        // No timestamps: the equal-timestamp winner decides
        let client = snapshot(json!({"id": "g1", "currentAmount": 300}));
        let server = snapshot(json!({"id": "g1", "currentAmount": 250}));
        let diffs = compute_diffs(&client, &server, &config);
        let outcome = merge_record(&client, &server, &diffs, &config);
        assert_eq!(outcome.record.get("currentAmount"), Some(&json!(250)));
        assert_eq!(
            outcome.notes,
            vec!["currentAmount: monetary value taken from server (never averaged)".to_string()]
        );
    }

    #[test]
    fn test_record_merge_overlays_suggestions() {
        let config = EngineConfig::default();
        let client = snapshot(json!({
            "id": "g1", "currentAmount": 300, "notes": "from phone", "tags": ["trip"],
            "nickname": "Japan", "updatedAt": 2000
        }));
        let server = snapshot(json!({
            "id": "g1", "currentAmount": 250, "notes": "from web", "tags": ["travel"],
            "institution": "Bank", "updatedAt": 1000
        }));
        let diffs = compute_diffs(&client, &server, &config);
        let outcome = merge_record(&client, &server, &diffs, &config);

        assert_eq!(
            outcome.record.into_value(),
            json!({
                "id": "g1",
                "currentAmount": 300,
                "notes": "from phone | from web",
                "tags": ["trip", "travel"],
                "nickname": "Japan",
                "institution": "Bank",
                "updatedAt": 2000
            })
        );
    }
}

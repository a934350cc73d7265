//! Field-level diffing of two record snapshots.
//!
//! Output is a pure function of the two snapshots and the configuration:
//! fields are visited in sorted order and nothing reads the clock, so the
//! same inputs always yield the same diff list.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::config::EngineConfig;
use crate::models::{Diff, DiffType, MergeStrategy, RecordSnapshot, Resolution, Severity, Side};

/// Which snapshot is newer according to the configured timestamp field.
///
/// Equal timestamps go to `equal_timestamp_winner`; `None` when either side
/// has no readable timestamp.
pub fn newer_side(
    client: &RecordSnapshot,
    server: &RecordSnapshot,
    config: &EngineConfig,
) -> Option<Side> {
    let client_ts = client.timestamp_ms(&config.timestamp_field)?;
    let server_ts = server.timestamp_ms(&config.timestamp_field)?;
    Some(match client_ts.cmp(&server_ts) {
        std::cmp::Ordering::Greater => Side::Client,
        std::cmp::Ordering::Less => Side::Server,
        std::cmp::Ordering::Equal => config.equal_timestamp_winner,
    })
}

/// Compute the ordered diff list between two snapshots, unchanged fields omitted
pub fn compute_diffs(
    client: &RecordSnapshot,
    server: &RecordSnapshot,
    config: &EngineConfig,
) -> Vec<Diff> {
    let newer = newer_side(client, server, config);
    let fields: BTreeSet<&String> = client
        .fields()
        .keys()
        .chain(server.fields().keys())
        .collect();

    fields
        .into_iter()
        .filter_map(|field| {
            let client_value = client.get(field);
            let server_value = server.get(field);
            let diff_type = classify_presence(client_value, server_value);
            if diff_type == DiffType::Unchanged {
                return None;
            }

            let severity = field_severity(field, client_value, server_value, config);
            let merge_strategy = merge_strategy_for(field, client_value, server_value, config);
            let suggested_resolution =
                suggest_resolution(field, diff_type, severity, merge_strategy, newer, config);

            Some(Diff {
                field: field.clone(),
                client_value: client_value.cloned(),
                server_value: server_value.cloned(),
                diff_type,
                severity,
                suggested_resolution,
                merge_strategy,
            })
        })
        .collect()
}

fn classify_presence(client: Option<&Value>, server: Option<&Value>) -> DiffType {
    match (client, server) {
        (Some(_), None) => DiffType::Added,
        (None, Some(_)) => DiffType::Removed,
        (Some(client), Some(server)) if client != server => DiffType::Modified,
        _ => DiffType::Unchanged,
    }
}

/// Per-field severity: named critical, high and integrity fields first, then
/// relative numeric drift, then `low`.
pub fn field_severity(
    field: &str,
    client: Option<&Value>,
    server: Option<&Value>,
    config: &EngineConfig,
) -> Severity {
    if config.is_critical_field(field) {
        return Severity::Critical;
    }
    if config.is_high_field(field) {
        return Severity::High;
    }
    if config.is_medium_field(field) {
        return Severity::Medium;
    }
    if config.is_timestamp_field(field) {
        return Severity::Low;
    }

    let (Some(client), Some(server)) = (
        client.and_then(Value::as_f64),
        server.and_then(Value::as_f64),
    ) else {
        return Severity::Low;
    };

    let ratio = relative_difference(client, server);
    if ratio > config.numeric_high_ratio {
        Severity::High
    } else if ratio > config.numeric_medium_ratio {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// `|a - b|` as a fraction of the larger magnitude
fn relative_difference(a: f64, b: f64) -> f64 {
    let larger = a.abs().max(b.abs());
    if larger == 0.0 {
        0.0
    } else {
        (a - b).abs() / larger
    }
}

/// How the two values would be combined if `merge` were chosen
pub fn merge_strategy_for(
    field: &str,
    client: Option<&Value>,
    server: Option<&Value>,
    config: &EngineConfig,
) -> MergeStrategy {
    let (Some(client), Some(server)) = (client, server) else {
        return MergeStrategy::ClientFallback;
    };

    if config.is_timestamp_field(field) {
        return MergeStrategy::Latest;
    }

    match (client, server) {
        (Value::Number(_), Value::Number(_)) if config.is_monetary_field(field) => {
            MergeStrategy::DeferToRule
        }
        (Value::Number(_), Value::Number(_)) => MergeStrategy::Average,
        (Value::String(_), Value::String(_)) => MergeStrategy::Concatenate,
        (Value::Array(_), Value::Array(_)) => MergeStrategy::Union,
        (Value::Object(_), Value::Object(_)) => MergeStrategy::Recursive,
        _ => MergeStrategy::ClientFallback,
    }
}

fn suggest_resolution(
    field: &str,
    diff_type: DiffType,
    severity: Severity,
    merge_strategy: MergeStrategy,
    newer: Option<Side>,
    config: &EngineConfig,
) -> Option<Resolution> {
    match diff_type {
        DiffType::Added => return Some(Resolution::Client),
        DiffType::Removed => return Some(Resolution::Server),
        DiffType::Modified | DiffType::Unchanged => {}
    }

    if severity == Severity::Critical {
        return newer.map(Resolution::from);
    }

    let mergeable = match merge_strategy {
        MergeStrategy::Union | MergeStrategy::Recursive | MergeStrategy::Latest => true,
        MergeStrategy::Concatenate => config.is_text_merge_field(field),
        MergeStrategy::Average => severity == Severity::Low,
        MergeStrategy::DeferToRule | MergeStrategy::ClientFallback => false,
    };

    if mergeable {
        Some(Resolution::Merge)
    } else {
        newer.map(Resolution::from)
    }
}

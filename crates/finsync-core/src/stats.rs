//! Conflict statistics for reporting

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::Conflict;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConflictStats {
    pub total: usize,
    pub unresolved: usize,
    pub auto_resolvable: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    /// Keyed by the latest resolution action of each conflict
    pub by_action: BTreeMap<String, usize>,
    /// Mean confidence of latest resolutions; `None` when nothing was resolved
    pub average_confidence: Option<f64>,
    /// Resolution records confirmed persisted remotely
    pub durable_records: usize,
}

impl ConflictStats {
    pub fn collect<'a>(conflicts: impl IntoIterator<Item = &'a Conflict>) -> Self {
        let mut stats = Self::default();
        let mut confidence_sum = 0.0;
        let mut confidence_count = 0_usize;

        for conflict in conflicts {
            stats.total += 1;
            if !conflict.is_resolved() {
                stats.unresolved += 1;
            }
            if conflict.auto_resolvable {
                stats.auto_resolvable += 1;
            }
            *stats
                .by_category
                .entry(conflict.category.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_severity
                .entry(conflict.severity.as_str().to_string())
                .or_default() += 1;

            if let Some(last) = conflict.last_resolution() {
                *stats.by_action.entry(last.action.as_str().to_string()).or_default() += 1;
                if conflict.is_resolved() {
                    confidence_sum += last.confidence;
                    confidence_count += 1;
                }
            }
            stats.durable_records += conflict
                .resolution_history
                .iter()
                .filter(|record| record.durable)
                .count();
        }

        if confidence_count > 0 {
            stats.average_confidence = Some(confidence_sum / confidence_count as f64);
        }
        stats
    }
}

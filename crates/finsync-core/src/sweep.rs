//! Auto-resolution sweep: the gate between automatic and human handling.

use serde::Serialize;

use crate::engine::ConflictEngine;
use crate::models::{Conflict, RecordSnapshot, Severity};

/// A conflict resolved by the sweep, with the record to persist
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConflict {
    pub conflict: Conflict,
    pub data: RecordSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutoResolveResult {
    pub resolved: Vec<ResolvedConflict>,
    /// Everything left for a human, including conflicts whose resolution failed
    pub remaining: Vec<Conflict>,
}

/// Resolve every conflict that is auto-resolvable and below critical severity
/// with its own suggestion.
///
/// Classification is recomputed for each conflict on every call.
pub fn auto_resolve(engine: &ConflictEngine, conflicts: Vec<Conflict>) -> AutoResolveResult {
    let mut result = AutoResolveResult::default();

    for mut conflict in conflicts {
        engine.prepare(&mut conflict);
        if !conflict.auto_resolvable || conflict.severity >= Severity::Critical {
            result.remaining.push(conflict);
            continue;
        }

        match engine.resolve_suggested(&mut conflict) {
            Ok(outcome) => match outcome.data() {
                Some(data) => {
                    let data = data.clone();
                    result.resolved.push(ResolvedConflict { conflict, data });
                }
                None => result.remaining.push(conflict),
            },
            Err(error) => {
                tracing::warn!(conflict_id = %conflict.id, "Auto-resolution failed: {error}");
                result.remaining.push(conflict);
            }
        }
    }

    tracing::info!(
        resolved = result.resolved.len(),
        remaining = result.remaining.len(),
        "Auto-resolution sweep finished"
    );
    result
}

//! Pluggable resolution prediction consulted by rule conditions

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::diff::newer_side;
use crate::models::{Conflict, Diff, Resolution, Severity};

/// A predicted resolution and how confident the predictor is in it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub resolution: Resolution,
    pub confidence: f64,
}

/// Source of resolution predictions.
///
/// Implementations must be deterministic for a given conflict and diff list.
pub trait Predictor: Send + Sync {
    fn predict(&self, conflict: &Conflict, diffs: &[Diff], config: &EngineConfig)
        -> Option<Prediction>;
}

/// Predicts the newer side, less confidently the more severe the conflict.
///
/// When every diff suggests a merge, predicts `merge` instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicPredictor;

const MERGE_CONFIDENCE: f64 = 0.7;

impl HeuristicPredictor {
    const fn confidence_for(severity: Severity) -> f64 {
        match severity {
            Severity::Low => 0.9,
            Severity::Medium => 0.75,
            Severity::High => 0.6,
            Severity::Critical => 0.4,
        }
    }
}

impl Predictor for HeuristicPredictor {
    fn predict(
        &self,
        conflict: &Conflict,
        diffs: &[Diff],
        config: &EngineConfig,
    ) -> Option<Prediction> {
        if diffs.is_empty() {
            return None;
        }

        if diffs
            .iter()
            .all(|diff| diff.suggested_resolution == Some(Resolution::Merge))
        {
            return Some(Prediction {
                resolution: Resolution::Merge,
                confidence: MERGE_CONFIDENCE,
            });
        }

        let side = newer_side(&conflict.client, &conflict.server, config)
            .unwrap_or(config.equal_timestamp_winner);
        let severity = diffs
            .iter()
            .map(|diff| diff.severity)
            .max()
            .unwrap_or_default();

        Some(Prediction {
            resolution: side.into(),
            confidence: Self::confidence_for(severity),
        })
    }
}

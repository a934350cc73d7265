//! Learned user resolution pattern model

use serde::{Deserialize, Serialize};
use std::fmt;

use super::conflict::Resolution;

/// Key of a learned pattern: one user, one conflict type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternKey {
    pub user_id: String,
    /// `entity_type:category`, see `Conflict::conflict_type`
    pub conflict_type: String,
}

impl PatternKey {
    pub fn new(user_id: impl Into<String>, conflict_type: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conflict_type: conflict_type.into(),
        }
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.conflict_type)
    }
}

/// A user's learned preference for one conflict type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPattern {
    pub preferred_resolution: Resolution,
    /// Confidence in the preference (0-1)
    pub confidence: f64,
    /// Number of observed resolutions
    pub frequency: u64,
    /// Last observation timestamp (Unix ms)
    pub last_used: i64,
}

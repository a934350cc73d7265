//! User resolution pattern store and learner.
//!
//! The pattern map is the engine's only shared mutable state. The outer
//! `RwLock` only guards the key -> cell index; every read-modify-write of a
//! pattern holds that key's own mutex, so unrelated conflict types never
//! contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::config::PatternConfig;
use crate::models::{PatternKey, Resolution, UserPattern};

type PatternCell = Arc<Mutex<Option<UserPattern>>>;

/// Keyed pattern store with per-key write serialization
#[derive(Debug, Default)]
pub struct PatternStore {
    cells: RwLock<HashMap<PatternKey, PatternCell>>,
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from persisted patterns
    pub fn from_patterns(patterns: impl IntoIterator<Item = (PatternKey, UserPattern)>) -> Self {
        let cells = patterns
            .into_iter()
            .map(|(key, pattern)| (key, Arc::new(Mutex::new(Some(pattern)))))
            .collect();
        Self {
            cells: RwLock::new(cells),
        }
    }

    /// Current pattern for a key, if one has been learned
    pub fn get(&self, key: &PatternKey) -> Option<UserPattern> {
        let cell = {
            let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
            cells.get(key).cloned()
        }?;
        let pattern = cell.lock().unwrap_or_else(PoisonError::into_inner);
        pattern.clone()
    }

    /// Run `update` on the key's pattern while holding that key's lock
    pub fn update<R>(
        &self,
        key: &PatternKey,
        update: impl FnOnce(&mut Option<UserPattern>) -> R,
    ) -> R {
        let cell = self.cell(key);
        let mut pattern = cell.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut pattern)
    }

    fn cell(&self, key: &PatternKey) -> PatternCell {
        if let Some(cell) = self
            .cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(cell);
        }

        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cells.entry(key.clone()).or_default())
    }

    /// All learned patterns, sorted by key
    pub fn patterns(&self) -> Vec<(PatternKey, UserPattern)> {
        let cells: Vec<(PatternKey, PatternCell)> = {
            let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
            cells
                .iter()
                .map(|(key, cell)| (key.clone(), Arc::clone(cell)))
                .collect()
        };

        let mut patterns: Vec<(PatternKey, UserPattern)> = cells
            .into_iter()
            .filter_map(|(key, cell)| {
                let pattern = cell.lock().unwrap_or_else(PoisonError::into_inner);
                pattern.clone().map(|pattern| (key, pattern))
            })
            .collect();
        patterns.sort_by(|(a, _), (b, _)| a.cmp(b));
        patterns
    }

    /// Independent copy; writes to the copy never reach this store
    pub fn snapshot(&self) -> Self {
        Self::from_patterns(self.patterns())
    }

    pub fn len(&self) -> usize {
        self.patterns().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies one observed resolution to a user's pattern
#[derive(Debug, Clone)]
pub struct PatternLearner {
    config: PatternConfig,
}

impl PatternLearner {
    pub const fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    /// Record that `resolution` was chosen for `key` at `now_ms`.
    ///
    /// Returns the updated pattern.
    pub fn observe(
        &self,
        store: &PatternStore,
        key: &PatternKey,
        resolution: Resolution,
        now_ms: i64,
    ) -> UserPattern {
        let updated = store.update(key, |slot| {
            let pattern = match slot.take() {
                None => UserPattern {
                    preferred_resolution: resolution,
                    confidence: self.config.initial_confidence,
                    frequency: 1,
                    last_used: now_ms,
                },
                Some(pattern) => self.apply(pattern, resolution, now_ms),
            };
            *slot = Some(pattern.clone());
            pattern
        });

        tracing::debug!(
            pattern = %key,
            preferred = updated.preferred_resolution.as_str(),
            confidence = updated.confidence,
            frequency = updated.frequency,
            "Updated resolution pattern"
        );
        updated
    }

    fn apply(&self, mut pattern: UserPattern, resolution: Resolution, now_ms: i64) -> UserPattern {
        pattern.frequency = pattern.frequency.saturating_add(1);
        pattern.last_used = pattern.last_used.max(now_ms);

        if pattern.preferred_resolution == resolution {
            let gain = self.config.confidence_step_up * (1.0 - pattern.confidence);
            pattern.confidence = (pattern.confidence + gain).min(1.0);
        } else {
            pattern.confidence = (pattern.confidence - self.config.confidence_step_down).max(0.0);
            if pattern.confidence < self.config.preference_overwrite_below {
                pattern.preferred_resolution = resolution;
            }
        }
        pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(user: &str) -> PatternKey {
        PatternKey::new(user, "account:data")
    }

    fn learner() -> PatternLearner {
        PatternLearner::new(PatternConfig::default())
    }

    #[test]
    fn test_first_observation_seeds_pattern() {
        let store = PatternStore::new();
        let pattern = learner().observe(&store, &key("u1"), Resolution::Client, 10);
        assert_eq!(pattern.preferred_resolution, Resolution::Client);
        assert!((pattern.confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(pattern.frequency, 1);
        assert_eq!(store.get(&key("u1")), Some(pattern));
    }

    #[test]
    fn test_matching_choices_strictly_increase_below_one() {
        let store = PatternStore::new();
        let learner = learner();
        let mut previous = learner.observe(&store, &key("u1"), Resolution::Merge, 0).confidence;
        for step in 1..200 {
            let current = learner
                .observe(&store, &key("u1"), Resolution::Merge, step)
                .confidence;
            assert!(current > previous);
            assert!(current < 1.0);
            previous = current;
        }
        assert!(previous > 0.99);
    }

    #[test]
    fn test_diverging_choices_overwrite_preference_below_half() {
        let store = PatternStore::new();
        let learner = learner();
        for step in 0..10 {
            learner.observe(&store, &key("u1"), Resolution::Client, step);
        }
        let before = store.get(&key("u1")).unwrap();
        assert!(before.confidence > 0.8);

        let after = learner.observe(&store, &key("u1"), Resolution::Server, 10);
        assert!(after.confidence < before.confidence);
        assert_eq!(after.preferred_resolution, Resolution::Client);

        let flipped = learner.observe(&store, &key("u1"), Resolution::Server, 11);
        assert!(flipped.confidence < 0.5);
        assert_eq!(flipped.preferred_resolution, Resolution::Server);
        assert_eq!(flipped.frequency, 12);
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let store = PatternStore::new();
        learner().observe(&store, &key("u1"), Resolution::Client, 1);

        let copy = store.snapshot();
        learner().observe(&copy, &key("u1"), Resolution::Client, 2);
        learner().observe(&copy, &key("u2"), Resolution::Server, 2);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key("u1")).unwrap().frequency, 1);
        assert_eq!(copy.len(), 2);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(PatternStore::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let learner = learner();
                    for step in 0..50 {
                        learner.observe(&store, &key("shared"), Resolution::Merge, step);
                        learner.observe(&store, &key(&format!("u{worker}")), Resolution::Client, step);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get(&key("shared")).unwrap().frequency, 400);
        assert_eq!(store.len(), 9);
    }
}

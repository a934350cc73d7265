//! Engine configuration.
//!
//! Every product heuristic the engine relies on (severity thresholds, named
//! field lists, the equal-timestamp winner, learning rates) lives here so it
//! can be overridden from a JSON file instead of being baked into the code.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Side;
use crate::util::{contains_field, normalize_list, normalize_text_option, RegexCache};

const DEFAULT_TIMESTAMP_FIELD: &str = "updatedAt";
const DEFAULT_OWNER_FIELD: &str = "userId";
const DEFAULT_MERGE_SEPARATOR: &str = " | ";
const DEFAULT_SCHEMA_ENTITY_PATTERN: &str = r"(?i)(schema|meta)";
const DEFAULT_CURRENCY_PATTERN: &str = r"^[A-Z]{3}$";

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Field holding each snapshot's modification time
    pub timestamp_field: String,
    /// Field naming the owning user of a record
    pub owner_field: String,
    /// Side preferred when both snapshots carry the same timestamp
    pub equal_timestamp_winner: Side,
    /// Relative numeric difference above which a field is `high`
    pub numeric_high_ratio: f64,
    /// Relative numeric difference above which a field is `medium`
    pub numeric_medium_ratio: f64,
    /// Identity, account identifiers and balances
    pub critical_fields: Vec<String>,
    /// Display name, amounts and due dates
    pub high_fields: Vec<String>,
    /// Status, type and category
    pub medium_fields: Vec<String>,
    /// Monetary values that are never averaged
    pub monetary_fields: Vec<String>,
    /// Free-text fields whose edits are concatenated by the merge suggestion
    pub text_merge_fields: Vec<String>,
    /// Separator placed between concatenated strings
    pub merge_separator: String,
    /// Entity types matching this regex are classified as schema conflicts
    pub schema_entity_pattern: String,
    #[serde(skip)]
    pub(crate) schema_entity_regex: RegexCache,
    /// Days a resolved conflict is kept before it may be purged
    pub retention_days: u32,
    pub patterns: PatternConfig,
    pub business_rules: BusinessRules,
    pub scenarios: ScenarioConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_string(),
            owner_field: DEFAULT_OWNER_FIELD.to_string(),
            equal_timestamp_winner: Side::Server,
            numeric_high_ratio: 0.5,
            numeric_medium_ratio: 0.1,
            critical_fields: strings(&[
                "id",
                "accountId",
                "accountNumber",
                "balance",
                "currentBalance",
                "availableBalance",
            ]),
            high_fields: strings(&["name", "amount", "dueDate", "targetAmount"]),
            medium_fields: strings(&["status", "type", "category"]),
            monetary_fields: strings(&[
                "balance",
                "currentBalance",
                "availableBalance",
                "amount",
                "targetAmount",
                "currentAmount",
            ]),
            text_merge_fields: strings(&["notes", "description", "memo"]),
            merge_separator: DEFAULT_MERGE_SEPARATOR.to_string(),
            schema_entity_pattern: DEFAULT_SCHEMA_ENTITY_PATTERN.to_string(),
            schema_entity_regex: RegexCache::default(),
            retention_days: 30,
            patterns: PatternConfig::default(),
            business_rules: BusinessRules::default(),
            scenarios: ScenarioConfig::default(),
        }
    }
}

/// Pattern learner tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatternConfig {
    /// Confidence of a pattern after its first observation
    pub initial_confidence: f64,
    /// Fraction of the remaining distance to 1.0 gained on a matching choice
    pub confidence_step_up: f64,
    /// Confidence lost on a diverging choice
    pub confidence_step_down: f64,
    /// Below this confidence a diverging choice replaces the preference
    pub preference_overwrite_below: f64,
    /// Above this confidence a pattern may short-circuit rule evaluation
    pub shortcut_threshold: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            initial_confidence: 0.5,
            confidence_step_up: 0.1,
            confidence_step_down: 0.2,
            preference_overwrite_below: 0.5,
            shortcut_threshold: 0.7,
        }
    }
}

/// Record-level rules enforced by the business-rule and compliance handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusinessRules {
    /// Fields that must be present and non-null
    pub required_fields: Vec<String>,
    /// Fields that, when present, must be non-negative numbers
    pub non_negative_fields: Vec<String>,
    pub currency_field: String,
    pub currency_pattern: String,
    #[serde(skip)]
    currency_regex: RegexCache,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            required_fields: strings(&["id"]),
            non_negative_fields: strings(&["targetAmount", "currentAmount"]),
            currency_field: "currency".to_string(),
            currency_pattern: DEFAULT_CURRENCY_PATTERN.to_string(),
            currency_regex: RegexCache::default(),
        }
    }
}

impl BusinessRules {
    /// Whether `code` matches the configured currency pattern
    pub fn is_valid_currency(&self, code: &str) -> Result<bool> {
        self.currency_regex
            .is_match(&self.currency_pattern, code)
            .map_err(|error| {
                Error::InvalidInput(format!("invalid business_rules.currency_pattern: {error}"))
            })
    }
}

/// Scenario harness comparison settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Decimal places floats are rounded to before comparison
    pub float_precision: u32,
    /// Fields dropped before comparison (timestamps, repair notes)
    pub ignored_fields: Vec<String>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            float_precision: 2,
            ignored_fields: strings(&["updatedAt", "updated_at", "resolvedAt", "_repairNotes"]),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No engine config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse, normalize and validate configuration from JSON text
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config = serde_json::from_str::<Self>(raw)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Write the normalized configuration as pretty JSON
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut normalized = self.clone();
        normalized.normalize();
        std::fs::write(path, serde_json::to_string_pretty(&normalized)?)?;
        Ok(())
    }

    /// Check value ranges and compile the configured regexes once
    pub fn validate(&self) -> Result<()> {
        let ratio_ok = |ratio: f64| ratio.is_finite() && ratio >= 0.0;
        if !ratio_ok(self.numeric_high_ratio) || !ratio_ok(self.numeric_medium_ratio) {
            return Err(Error::InvalidInput(
                "numeric severity ratios must be non-negative".to_string(),
            ));
        }
        if self.numeric_medium_ratio > self.numeric_high_ratio {
            return Err(Error::InvalidInput(format!(
                "numeric_medium_ratio ({}) must not exceed numeric_high_ratio ({})",
                self.numeric_medium_ratio, self.numeric_high_ratio
            )));
        }

        let patterns = &self.patterns;
        for (name, value) in [
            ("initial_confidence", patterns.initial_confidence),
            ("confidence_step_up", patterns.confidence_step_up),
            ("confidence_step_down", patterns.confidence_step_down),
            ("preference_overwrite_below", patterns.preference_overwrite_below),
            ("shortcut_threshold", patterns.shortcut_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidInput(format!(
                    "patterns.{name} must be within 0..=1, got {value}"
                )));
            }
        }

        Regex::new(&self.schema_entity_pattern).map_err(|error| {
            Error::InvalidInput(format!("invalid schema_entity_pattern: {error}"))
        })?;
        Regex::new(&self.business_rules.currency_pattern).map_err(|error| {
            Error::InvalidInput(format!("invalid business_rules.currency_pattern: {error}"))
        })?;
        Ok(())
    }

    pub fn is_critical_field(&self, field: &str) -> bool {
        contains_field(&self.critical_fields, field)
    }

    pub fn is_high_field(&self, field: &str) -> bool {
        contains_field(&self.high_fields, field)
    }

    pub fn is_medium_field(&self, field: &str) -> bool {
        contains_field(&self.medium_fields, field)
    }

    pub fn is_monetary_field(&self, field: &str) -> bool {
        contains_field(&self.monetary_fields, field)
    }

    pub fn is_text_merge_field(&self, field: &str) -> bool {
        contains_field(&self.text_merge_fields, field)
    }

    pub fn is_timestamp_field(&self, field: &str) -> bool {
        self.timestamp_field.eq_ignore_ascii_case(field)
    }

    /// Whether an entity type names schema or metadata records
    pub fn is_schema_entity(&self, entity_type: &str) -> bool {
        match self
            .schema_entity_regex
            .is_match(&self.schema_entity_pattern, entity_type)
        {
            Ok(matched) => matched,
            Err(error) => {
                tracing::warn!("Ignoring invalid schema_entity_pattern: {error}");
                false
            }
        }
    }

    /// Retention horizon in milliseconds
    pub fn retention_ms(&self) -> i64 {
        i64::from(self.retention_days) * 24 * 60 * 60 * 1000
    }

    fn normalize(&mut self) {
        self.timestamp_field = normalize_text_option(Some(self.timestamp_field.clone()))
            .unwrap_or_else(|| DEFAULT_TIMESTAMP_FIELD.to_string());
        self.owner_field = normalize_text_option(Some(self.owner_field.clone()))
            .unwrap_or_else(|| DEFAULT_OWNER_FIELD.to_string());
        if self.merge_separator.is_empty() {
            self.merge_separator = DEFAULT_MERGE_SEPARATOR.to_string();
        }
        self.schema_entity_pattern =
            normalize_text_option(Some(self.schema_entity_pattern.clone()))
                .unwrap_or_else(|| DEFAULT_SCHEMA_ENTITY_PATTERN.to_string());

        self.critical_fields = normalize_list(std::mem::take(&mut self.critical_fields));
        self.high_fields = normalize_list(std::mem::take(&mut self.high_fields));
        self.medium_fields = normalize_list(std::mem::take(&mut self.medium_fields));
        self.monetary_fields = normalize_list(std::mem::take(&mut self.monetary_fields));
        self.text_merge_fields = normalize_list(std::mem::take(&mut self.text_merge_fields));

        let rules = &mut self.business_rules;
        rules.required_fields = normalize_list(std::mem::take(&mut rules.required_fields));
        rules.non_negative_fields = normalize_list(std::mem::take(&mut rules.non_negative_fields));
        rules.currency_field = rules.currency_field.trim().to_string();
        rules.currency_pattern = normalize_text_option(Some(rules.currency_pattern.clone()))
            .unwrap_or_else(|| DEFAULT_CURRENCY_PATTERN.to_string());

        self.scenarios.ignored_fields =
            normalize_list(std::mem::take(&mut self.scenarios.ignored_fields));
    }
}

use std::env;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use finsync_core::db::{
    ConflictRepository, Database, PatternRepository, SqliteConflictRepository,
    SqlitePatternRepository, SqliteStrategyRepository, StrategyRepository,
};
use finsync_core::models::{FieldMap, PendingOperation};
use finsync_core::pattern::PatternStore;
use finsync_core::{Conflict, ConflictEngine, ConflictId, EngineConfig, RecordSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CliError;

/// One conflict as supplied by the sync transport
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConflictInput {
    pub entity_type: String,
    pub entity_id: String,
    pub client: Value,
    pub server: Value,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub operation: PendingOperation,
    #[serde(default)]
    pub metadata: FieldMap,
}

impl ConflictInput {
    /// `None` when both snapshots are identical and nothing is pending
    pub fn into_conflict(self) -> Result<Option<Conflict>, CliError> {
        let Some(mut conflict) = Conflict::detect(
            self.entity_type,
            self.entity_id,
            RecordSnapshot::from_value(self.client)?,
            RecordSnapshot::from_value(self.server)?,
            self.operation,
        ) else {
            return Ok(None);
        };
        conflict = conflict.with_metadata(self.metadata);
        conflict.user_id = self.user_id.as_deref().and_then(normalize_text);
        Ok(Some(conflict))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

/// Read a JSON file holding one item or an array of items
pub fn read_json_items<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, CliError> {
    let raw = std::fs::read_to_string(path)?;
    let items = match serde_json::from_str::<OneOrMany<T>>(&raw)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    };
    if items.is_empty() {
        return Err(CliError::EmptyInput(path.display().to_string()));
    }
    Ok(items)
}

/// Read conflict inputs, dropping pairs that do not actually diverge
pub fn read_conflicts(path: &Path) -> Result<Vec<Conflict>, CliError> {
    let mut conflicts = Vec::new();
    for input in read_json_items::<ConflictInput>(path)? {
        let subject = format!("{}:{}", input.entity_type, input.entity_id);
        match input.into_conflict()? {
            Some(conflict) => conflicts.push(conflict),
            None => tracing::info!("Skipping {subject}: snapshots are identical"),
        }
    }
    Ok(conflicts)
}

/// Open store and engine together; learned patterns and stored strategies
/// are loaded into the engine.
pub struct Session {
    pub db: Database,
    pub engine: Arc<ConflictEngine>,
}

impl Session {
    pub fn open(db_path: &Path, config_path: Option<&Path>) -> Result<Self, CliError> {
        let config = match config_path {
            Some(path) if !path.exists() => {
                return Err(CliError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            Some(path) => EngineConfig::load_from_path(path)?,
            None => EngineConfig::default(),
        };
        let db = Database::open(db_path)?;

        let patterns = SqlitePatternRepository::new(db.connection()).load_all()?;
        let engine = ConflictEngine::new(config).with_patterns(Arc::new(PatternStore::from_patterns(patterns)));
        for strategy in SqliteStrategyRepository::new(db.connection()).load_all()? {
            engine.upsert_strategy(strategy);
        }

        Ok(Self {
            db,
            engine: Arc::new(engine),
        })
    }

    pub fn conflicts(&self) -> SqliteConflictRepository<'_> {
        SqliteConflictRepository::new(self.db.connection())
    }

    /// Conflicts from `file`, or stored unresolved conflicts when omitted
    pub fn load_conflicts(&self, file: Option<&Path>) -> Result<Vec<Conflict>, CliError> {
        match file {
            Some(path) => read_conflicts(path),
            None => Ok(self.conflicts().list(true, usize::MAX)?),
        }
    }

    /// Write back conflicts and the learned pattern map
    pub fn persist(&self, conflicts: &[Conflict]) -> Result<(), CliError> {
        self.conflicts().save_all(conflicts)?;
        SqlitePatternRepository::new(self.db.connection()).save_all(&self.engine.patterns().patterns())?;
        Ok(())
    }

    /// Find a stored conflict by full ID or unique prefix
    pub fn find_conflict(&self, query: &str) -> Result<Conflict, CliError> {
        let query = normalize_text(query).ok_or(CliError::EmptyConflictId)?;
        let repo = self.conflicts();

        if let Ok(id) = query.parse::<ConflictId>() {
            if let Some(conflict) = repo.get(&id)? {
                return Ok(conflict);
            }
        }

        let mut matching: Vec<Conflict> = repo
            .list(false, usize::MAX)?
            .into_iter()
            .filter(|conflict| conflict.id.to_string().starts_with(&query))
            .collect();

        match matching.len() {
            0 => Err(CliError::ConflictNotFound(query)),
            1 => Ok(matching.remove(0)),
            _ => {
                let options = matching
                    .iter()
                    .take(3)
                    .map(|conflict| short_id(&conflict.id))
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(CliError::AmbiguousConflictId(format!(
                    "ID prefix '{query}' is ambiguous; matches: {options}"
                )))
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConflictListItem {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub category: String,
    pub severity: String,
    pub auto_resolvable: bool,
    pub resolved: bool,
    pub last_action: Option<String>,
    pub resolutions: usize,
    pub created_at: i64,
    pub relative_time: String,
}

pub fn conflict_to_list_item(conflict: &Conflict) -> ConflictListItem {
    ConflictListItem {
        id: conflict.id.to_string(),
        entity_type: conflict.entity_type.clone(),
        entity_id: conflict.entity_id.clone(),
        category: conflict.category.as_str().to_string(),
        severity: conflict.severity.as_str().to_string(),
        auto_resolvable: conflict.auto_resolvable,
        resolved: conflict.is_resolved(),
        last_action: conflict
            .last_resolution()
            .map(|record| record.action.as_str().to_string()),
        resolutions: conflict.resolution_history.len(),
        created_at: conflict.created_at,
        relative_time: format_relative_time(conflict.created_at, Utc::now().timestamp_millis()),
    }
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    conflicts
        .iter()
        .map(|conflict| {
            let status = conflict
                .last_resolution()
                .map_or("pending", |record| record.action.as_str());
            format!(
                "{}  {:<8}  {:<8}  {}:{}  {} ({})",
                short_id(&conflict.id),
                conflict.severity.as_str(),
                status,
                conflict.entity_type,
                conflict.entity_id,
                conflict.category.as_str(),
                format_relative_time(conflict.created_at, now_ms)
            )
        })
        .collect()
}

pub fn short_id(id: &ConflictId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn normalize_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Ask a yes/no question; a non-interactive stdin answers no
pub fn confirm(prompt: &str) -> Result<bool, CliError> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Ok(false);
    }

    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("FINSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("finsync")
        .join("finsync.db")
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> Option<PathBuf> {
    cli_config.or_else(|| env::var_os("FINSYNC_CONFIG").map(PathBuf::from))
}

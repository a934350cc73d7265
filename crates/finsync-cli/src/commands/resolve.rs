use std::path::Path;

use finsync_core::models::ResolvedBy;
use finsync_core::{Conflict, RecordSnapshot, ResolutionOutcome};
use serde::Serialize;

use crate::commands::common::{print_json, read_conflicts, Session};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct ResolveItem {
    pub conflict_id: String,
    pub entity_type: String,
    pub entity_id: String,
    /// `resolved`, `requires_input` or `failed`
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<RecordSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn resolve_item(
    conflict: &Conflict,
    result: &finsync_core::Result<ResolutionOutcome>,
) -> ResolveItem {
    let mut item = ResolveItem {
        conflict_id: conflict.id.to_string(),
        entity_type: conflict.entity_type.clone(),
        entity_id: conflict.entity_id.clone(),
        status: "failed",
        action: None,
        rule_id: None,
        confidence: None,
        note: None,
        data: None,
        error: None,
    };

    match result {
        Ok(outcome) => {
            let record = outcome.record();
            item.status = if outcome.is_resolved() {
                "resolved"
            } else {
                "requires_input"
            };
            item.action = Some(record.action.as_str().to_string());
            item.rule_id.clone_from(&record.rule_id);
            item.confidence = Some(record.confidence);
            item.note = Some(record.note.clone());
            item.data = outcome.data().cloned();
        }
        Err(error) => item.error = Some(error.to_string()),
    }
    item
}

pub fn format_resolve_line(item: &ResolveItem) -> String {
    let id = item.conflict_id.chars().take(13).collect::<String>();
    let subject = format!("{}:{}", item.entity_type, item.entity_id);
    match (&item.error, &item.action) {
        (Some(error), _) => format!("{id}  failed          {subject}  {error}"),
        (None, Some(action)) => format!(
            "{id}  {:<14}  {subject}  {action} ({:.2}) {}",
            item.status,
            item.confidence.unwrap_or_default(),
            item.note.as_deref().unwrap_or_default()
        ),
        (None, None) => format!("{id}  {:<14}  {subject}", item.status),
    }
}

pub fn print_items(items: &[ResolveItem], as_json: bool) -> Result<(), CliError> {
    if as_json {
        return print_json(&items);
    }
    for item in items {
        println!("{}", format_resolve_line(item));
    }
    Ok(())
}

pub fn run_resolve(
    file: &Path,
    strategy: &str,
    by: ResolvedBy,
    as_json: bool,
    session: &Session,
) -> Result<(), CliError> {
    // Unknown strategy is a usage error, not a per-conflict failure
    session.engine.strategy(strategy)?;

    let mut conflicts = read_conflicts(file)?;
    let items = conflicts
        .iter_mut()
        .map(|conflict| {
            let result = session.engine.resolve(conflict, strategy, by);
            resolve_item(conflict, &result)
        })
        .collect::<Vec<_>>();
    session.persist(&conflicts)?;

    print_items(&items, as_json)?;

    let awaiting = items.iter().any(|item| item.status == "requires_input");
    if !as_json && awaiting {
        println!("Awaiting a decision: finsync decide <ID> --choose client|server|merge");
    }

    let failed = items.iter().filter(|item| item.status == "failed").count();
    if failed > 0 {
        return Err(CliError::ResolutionFailed(failed));
    }
    Ok(())
}

use std::path::Path;

use finsync_core::{auto_resolve, AutoResolveResult, RecordSnapshot};
use serde::Serialize;

use crate::commands::common::{
    conflict_to_list_item, format_conflict_lines, print_json, short_id, ConflictListItem, Session,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct AutoResolvedItem {
    pub conflict_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: Option<String>,
    pub data: RecordSnapshot,
}

#[derive(Debug, Serialize)]
pub struct AutoReport {
    pub resolved: Vec<AutoResolvedItem>,
    pub remaining: Vec<ConflictListItem>,
}

pub fn auto_report(result: &AutoResolveResult) -> AutoReport {
    AutoReport {
        resolved: result
            .resolved
            .iter()
            .map(|resolved| AutoResolvedItem {
                conflict_id: resolved.conflict.id.to_string(),
                entity_type: resolved.conflict.entity_type.clone(),
                entity_id: resolved.conflict.entity_id.clone(),
                action: resolved
                    .conflict
                    .last_resolution()
                    .map(|record| record.action.as_str().to_string()),
                data: resolved.data.clone(),
            })
            .collect(),
        remaining: result.remaining.iter().map(conflict_to_list_item).collect(),
    }
}

pub fn run_auto(file: Option<&Path>, as_json: bool, session: &Session) -> Result<(), CliError> {
    let conflicts = session.load_conflicts(file)?;
    let result = auto_resolve(&session.engine, conflicts);

    let mut touched: Vec<_> = result
        .resolved
        .iter()
        .map(|resolved| resolved.conflict.clone())
        .collect();
    touched.extend(result.remaining.iter().cloned());
    session.persist(&touched)?;

    if as_json {
        return print_json(&auto_report(&result));
    }

    println!(
        "Auto-resolved {}, {} left for review",
        result.resolved.len(),
        result.remaining.len()
    );
    for resolved in &result.resolved {
        let action = resolved
            .conflict
            .last_resolution()
            .map_or("-", |record| record.action.as_str());
        println!(
            "{}  {:<8}  {}:{}",
            short_id(&resolved.conflict.id),
            action,
            resolved.conflict.entity_type,
            resolved.conflict.entity_id
        );
    }
    if !result.remaining.is_empty() {
        println!("Needs review:");
        for line in format_conflict_lines(&result.remaining) {
            println!("  {line}");
        }
    }
    Ok(())
}

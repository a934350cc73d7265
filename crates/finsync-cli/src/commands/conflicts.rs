use chrono::Utc;
use finsync_core::db::ConflictRepository;
use finsync_core::ConflictStats;

use crate::commands::common::{
    conflict_to_list_item, format_conflict_lines, print_json, ConflictListItem, Session,
};
use crate::error::CliError;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub fn run_conflicts_list(
    unresolved_only: bool,
    limit: usize,
    as_json: bool,
    session: &Session,
) -> Result<(), CliError> {
    let conflicts = session.conflicts().list(unresolved_only, limit)?;

    if as_json {
        let items = conflicts
            .iter()
            .map(conflict_to_list_item)
            .collect::<Vec<ConflictListItem>>();
        return print_json(&items);
    }

    if conflicts.is_empty() {
        println!("No conflicts stored.");
        return Ok(());
    }
    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub fn purge_cutoff(now_ms: i64, days: u32) -> i64 {
    now_ms.saturating_sub(i64::from(days).saturating_mul(DAY_MS))
}

pub fn run_conflicts_purge(days: Option<u32>, session: &Session) -> Result<(), CliError> {
    let days = days.unwrap_or(session.engine.config().retention_days);
    let cutoff = purge_cutoff(Utc::now().timestamp_millis(), days);
    let purged = session.conflicts().purge_resolved_before(cutoff)?;
    println!("Purged {purged} resolved conflict(s) older than {days} day(s)");
    Ok(())
}

pub fn format_stats_lines(stats: &ConflictStats) -> Vec<String> {
    let mut lines = vec![
        format!("total       {}", stats.total),
        format!("unresolved  {}", stats.unresolved),
        format!("auto        {}", stats.auto_resolvable),
        format!("durable     {}", stats.durable_records),
    ];
    if let Some(confidence) = stats.average_confidence {
        lines.push(format!("confidence  {confidence:.2}"));
    }
    for (title, counts) in [
        ("category", &stats.by_category),
        ("severity", &stats.by_severity),
        ("action", &stats.by_action),
    ] {
        if counts.is_empty() {
            continue;
        }
        let rendered = counts
            .iter()
            .map(|(key, count)| format!("{key}={count}"))
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!("{title:<11} {rendered}"));
    }
    lines
}

pub fn run_conflicts_stats(as_json: bool, session: &Session) -> Result<(), CliError> {
    let conflicts = session.conflicts().list(false, usize::MAX)?;
    let stats = ConflictStats::collect(&conflicts);

    if as_json {
        return print_json(&stats);
    }
    for line in format_stats_lines(&stats) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_conflicts_durable(id: &str, index: usize, session: &Session) -> Result<(), CliError> {
    let conflict = session.find_conflict(id)?;
    session.conflicts().mark_durable(&conflict.id, index)?;
    println!("{} resolution {index} marked durable", conflict.id);
    Ok(())
}

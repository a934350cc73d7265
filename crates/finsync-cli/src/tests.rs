use std::path::{Path, PathBuf};
use std::time::Duration;

use finsync_core::db::{ConflictRepository, PatternRepository, SqlitePatternRepository};
use finsync_core::defaults::{MANUAL, TIMESTAMP};
use finsync_core::models::{ResolutionAction, ResolvedBy};
use finsync_core::{BulkResolutionOptions, BulkStrategy, Decision};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::{tempdir, TempDir};

use crate::cli::{Choice, CompletionShell};
use crate::commands::bulk::{run_bulk, BulkArgs};
use crate::commands::common::{
    format_relative_time, is_yes, read_conflicts, resolve_db_path, short_id, Session,
};
use crate::commands::completions::render_completions;
use crate::commands::conflicts::purge_cutoff;
use crate::commands::decide::{decision_for, run_decide};
use crate::commands::resolve::{format_resolve_line, resolve_item, run_resolve};
use crate::error::CliError;

fn write_json(dir: &TempDir, name: &str, value: &serde_json::Value) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, value.to_string()).unwrap();
    path
}

fn balance_conflict(id: &str, user: &str) -> serde_json::Value {
    json!({
        "entity_type": "account",
        "entity_id": id,
        "user_id": user,
        "client": {"id": id, "balance": 1500, "updatedAt": 2_000},
        "server": {"id": id, "balance": 1450, "updatedAt": 1_000}
    })
}

fn open_session(dir: &TempDir) -> Session {
    Session::open(&dir.path().join("finsync.db"), None).unwrap()
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
}

#[test]
fn confirmation_answers() {
    assert!(is_yes("y\n"));
    assert!(is_yes(" YES "));
    assert!(!is_yes(""));
    assert!(!is_yes("nope"));
}

#[test]
fn resolve_db_path_prefers_explicit_path() {
    let explicit = PathBuf::from("/tmp/explicit.db");
    assert_eq!(resolve_db_path(Some(explicit.clone())), explicit);
}

#[test]
fn purge_cutoff_subtracts_days() {
    assert_eq!(purge_cutoff(10 * 86_400_000, 3), 7 * 86_400_000);
    assert_eq!(purge_cutoff(0, 0), 0);
}

#[test]
fn read_conflicts_accepts_one_or_many() {
    let dir = tempdir().unwrap();
    let single = write_json(&dir, "one.json", &balance_conflict("a1", "u1"));
    let many = write_json(
        &dir,
        "many.json",
        &json!([balance_conflict("a1", "u1"), balance_conflict("a2", "u1")]),
    );
    let empty = write_json(&dir, "empty.json", &json!([]));
    let same = write_json(
        &dir,
        "same.json",
        &json!({"entity_type": "account", "entity_id": "a1", "client": {"id": "a1"}, "server": {"id": "a1"}}),
    );

    assert_eq!(read_conflicts(&single).unwrap().len(), 1);
    let conflicts = read_conflicts(&many).unwrap();
    assert_eq!(conflicts.len(), 2);
    assert_eq!(conflicts[1].entity_id, "a2");
    assert_eq!(conflicts[1].user_id.as_deref(), Some("u1"));
    assert!(matches!(read_conflicts(&empty), Err(CliError::EmptyInput(_))));
    assert!(read_conflicts(&same).unwrap().is_empty());
}

#[test]
fn read_conflicts_rejects_non_object_snapshots() {
    let dir = tempdir().unwrap();
    let path = write_json(
        &dir,
        "bad.json",
        &json!({"entity_type": "account", "entity_id": "a1", "client": 1, "server": {}}),
    );
    assert!(read_conflicts(&path).is_err());
}

#[test]
fn decision_requires_merge_for_data() {
    assert_eq!(decision_for(Choice::Client, None).unwrap(), Decision::Client);
    assert!(matches!(
        decision_for(Choice::Server, Some(json!({"id": "a1"}))),
        Err(CliError::DataRequiresMerge)
    ));
    assert!(matches!(
        decision_for(Choice::Merge, Some(json!({"id": "a1"}))).unwrap(),
        Decision::Custom(_)
    ));
}

#[test]
fn resolve_item_reports_outcome() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    let path = write_json(&dir, "in.json", &balance_conflict("a1", "u1"));
    let mut conflict = read_conflicts(&path).unwrap().remove(0);

    let result = session.engine.resolve(&mut conflict, TIMESTAMP, ResolvedBy::System);
    let item = resolve_item(&conflict, &result);
    assert_eq!(item.status, "resolved");
    assert_eq!(item.action.as_deref(), Some("client"));
    assert_eq!(item.data.unwrap().get("balance"), Some(&json!(1500)));

    let result = session.engine.resolve(&mut conflict, "missing", ResolvedBy::System);
    let item = resolve_item(&conflict, &result);
    assert_eq!(item.status, "failed");
    assert!(format_resolve_line(&item).contains("failed"));
}

#[test]
fn resolve_then_decide_round_trip() {
    let dir = tempdir().unwrap();
    let path = write_json(&dir, "in.json", &balance_conflict("a1", "u1"));

    let session = open_session(&dir);
    run_resolve(&path, MANUAL, ResolvedBy::System, true, &session).unwrap();
    let stored = session.conflicts().list(true, 10).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(
        stored[0].last_resolution().unwrap().action,
        ResolutionAction::Skip
    );
    drop(session);

    // Fresh session: state must come from the store
    let session = open_session(&dir);
    let prefix = short_id(&session.conflicts().list(true, 10).unwrap()[0].id);
    run_decide(&prefix, Choice::Server, None, true, &session).unwrap();

    assert!(session.conflicts().list(true, 10).unwrap().is_empty());
    let patterns = SqlitePatternRepository::new(session.db.connection())
        .load_all()
        .unwrap();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].1.frequency, 1);
}

#[test]
fn find_conflict_reports_missing_prefix() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    assert!(matches!(
        session.find_conflict("ffffffff"),
        Err(CliError::ConflictNotFound(_))
    ));
    assert!(matches!(
        session.find_conflict("   "),
        Err(CliError::EmptyConflictId)
    ));
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempdir().unwrap();
    let result = Session::open(
        &dir.path().join("finsync.db"),
        Some(Path::new("/definitely/not/here.json")),
    );
    assert!(matches!(result, Err(CliError::Config(_))));
}

#[tokio::test]
async fn bulk_resolves_stored_conflicts_in_parallel() {
    let dir = tempdir().unwrap();
    let path = write_json(
        &dir,
        "in.json",
        &json!([
            balance_conflict("a1", "u1"),
            balance_conflict("a2", "u2"),
            balance_conflict("a3", "u1")
        ]),
    );
    let session = open_session(&dir);
    run_resolve(&path, MANUAL, ResolvedBy::System, true, &session).unwrap();

    let args = BulkArgs {
        file: None,
        options: BulkResolutionOptions {
            require_confirmation: true,
            ..BulkResolutionOptions::new(BulkStrategy::ServerWins)
        },
        yes: true,
        concurrency: Some(2),
        timeout: Duration::from_secs(10),
        json: true,
    };
    run_bulk(args, &session).await.unwrap();

    let stored = session.conflicts().list(false, 10).unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|conflict| conflict.last_resolution().unwrap().action
        == ResolutionAction::Server));
}

#[test]
fn completions_mention_binary_name() {
    let mut buffer = Vec::new();
    render_completions(CompletionShell::Bash, &mut buffer);
    let script = String::from_utf8(buffer).unwrap();
    assert!(script.contains("finsync"));
}

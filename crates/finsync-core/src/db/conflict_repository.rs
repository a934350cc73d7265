//! Conflict repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{Conflict, ConflictId};
use rusqlite::{params, Connection};

/// Trait for conflict storage operations
pub trait ConflictRepository {
    /// Insert or replace a conflict
    fn save(&self, conflict: &Conflict) -> Result<()>;

    /// Get a conflict by ID
    fn get(&self, id: &ConflictId) -> Result<Option<Conflict>>;

    /// List conflicts, oldest first
    fn list(&self, unresolved_only: bool, limit: usize) -> Result<Vec<Conflict>>;

    /// Mark one resolution record as persisted remotely
    fn mark_durable(&self, id: &ConflictId, resolution_index: usize) -> Result<Conflict>;

    /// Delete resolved conflicts whose latest resolution is older than `cutoff_ms`
    fn purge_resolved_before(&self, cutoff_ms: i64) -> Result<usize>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Save several conflicts in one transaction
    pub fn save_all(&self, conflicts: &[Conflict]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for conflict in conflicts {
            self.save(conflict)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn read_data(row: &rusqlite::Row<'_>) -> rusqlite::Result<String> {
        row.get(0)
    }

    fn decode(data: &str) -> Result<Conflict> {
        Ok(serde_json::from_str(data)?)
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn save(&self, conflict: &Conflict) -> Result<()> {
        let data = serde_json::to_string(conflict)?;
        self.conn.execute(
            "INSERT INTO conflicts (id, entity_type, entity_id, user_id, resolved, last_resolved_at, data, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                entity_type = excluded.entity_type,
                entity_id = excluded.entity_id,
                user_id = excluded.user_id,
                resolved = excluded.resolved,
                last_resolved_at = excluded.last_resolved_at,
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![
                conflict.id.as_str(),
                conflict.entity_type,
                conflict.entity_id,
                conflict.user_id,
                i32::from(conflict.is_resolved()),
                conflict.last_resolved_at(),
                data,
                conflict.created_at,
                conflict.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &ConflictId) -> Result<Option<Conflict>> {
        let result = self.conn.query_row(
            "SELECT data FROM conflicts WHERE id = ?",
            params![id.as_str()],
            Self::read_data,
        );

        match result {
            Ok(data) => Self::decode(&data).map(Some),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, unresolved_only: bool, limit: usize) -> Result<Vec<Conflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT data
             FROM conflicts
             WHERE (? = 0 OR resolved = 0)
             ORDER BY created_at ASC, id ASC
             LIMIT ?",
        )?;

        let rows = stmt
            .query_map(
                params![i32::from(unresolved_only), limit.min(i64::MAX as usize) as i64],
                Self::read_data,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.iter().map(|data| Self::decode(data)).collect()
    }

    fn mark_durable(&self, id: &ConflictId, resolution_index: usize) -> Result<Conflict> {
        let mut conflict = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))?;
        let record = conflict
            .resolution_history
            .get_mut(resolution_index)
            .ok_or_else(|| {
                Error::NotFound(format!("resolution {resolution_index} of conflict {id}"))
            })?;
        record.durable = true;
        self.save(&conflict)?;
        tracing::debug!(conflict_id = %id, resolution_index, "Marked resolution durable");
        Ok(conflict)
    }

    fn purge_resolved_before(&self, cutoff_ms: i64) -> Result<usize> {
        let purged = self.conn.execute(
            "DELETE FROM conflicts WHERE resolved = 1 AND last_resolved_at < ?",
            params![cutoff_ms],
        )?;
        if purged > 0 {
            tracing::info!("Purged {purged} resolved conflicts");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{RecordSnapshot, ResolutionAction, ResolutionRecord, ResolvedBy};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn conflict(entity_id: &str, created_at: i64) -> Conflict {
        let mut conflict = Conflict::new(
            "account",
            entity_id,
            RecordSnapshot::from_value(json!({"id": entity_id, "balance": 1})).unwrap(),
            RecordSnapshot::from_value(json!({"id": entity_id, "balance": 2})).unwrap(),
        );
        conflict.created_at = created_at;
        conflict.updated_at = created_at;
        conflict
    }

    fn record(timestamp: i64, action: ResolutionAction) -> ResolutionRecord {
        ResolutionRecord {
            timestamp,
            action,
            resolved_by: ResolvedBy::User,
            strategy_id: None,
            rule_id: None,
            merged_data: None,
            confidence: 1.0,
            note: String::new(),
            durable: false,
        }
    }

    #[test]
    fn test_save_and_get() {
        let db = setup();
        let repo = SqliteConflictRepository::new(db.connection());

        let conflict = conflict("a1", 10);
        repo.save(&conflict).unwrap();

        let fetched = repo.get(&conflict.id).unwrap().unwrap();
        assert_eq!(fetched, conflict);
        assert!(repo.get(&ConflictId::new()).unwrap().is_none());
    }

    #[test]
    fn test_save_upserts() {
        let db = setup();
        let repo = SqliteConflictRepository::new(db.connection());

        let mut conflict = conflict("a1", 10);
        repo.save(&conflict).unwrap();
        conflict.push_resolution(record(20, ResolutionAction::Server));
        repo.save(&conflict).unwrap();

        let all = repo.list(false, 10).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].resolution_history.len(), 1);
        assert!(repo.list(true, 10).unwrap().is_empty());
    }

    #[test]
    fn test_list_orders_and_limits() {
        let db = setup();
        let repo = SqliteConflictRepository::new(db.connection());

        let batch = vec![conflict("a3", 30), conflict("a1", 10), conflict("a2", 20)];
        repo.save_all(&batch).unwrap();

        let listed: Vec<String> = repo
            .list(false, 2)
            .unwrap()
            .into_iter()
            .map(|conflict| conflict.entity_id)
            .collect();
        assert_eq!(listed, vec!["a1".to_string(), "a2".to_string()]);
    }

    #[test]
    fn test_mark_durable() {
        let db = setup();
        let repo = SqliteConflictRepository::new(db.connection());

        let mut conflict = conflict("a1", 10);
        conflict.push_resolution(record(20, ResolutionAction::Client));
        repo.save(&conflict).unwrap();

        let updated = repo.mark_durable(&conflict.id, 0).unwrap();
        assert!(updated.resolution_history[0].durable);
        assert!(repo.get(&conflict.id).unwrap().unwrap().resolution_history[0].durable);
        assert!(matches!(
            repo.mark_durable(&conflict.id, 5),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_purge_keeps_unresolved() {
        let db = setup();
        let repo = SqliteConflictRepository::new(db.connection());

        let mut old_resolved = conflict("a1", 10);
        old_resolved.push_resolution(record(100, ResolutionAction::Merge));
        let mut fresh_resolved = conflict("a2", 20);
        fresh_resolved.push_resolution(record(5_000, ResolutionAction::Client));
        let mut awaiting = conflict("a3", 30);
        awaiting.push_resolution(record(100, ResolutionAction::Skip));
        let untouched = conflict("a4", 40);
        repo.save_all(&[old_resolved, fresh_resolved, awaiting, untouched])
            .unwrap();

        assert_eq!(repo.purge_resolved_before(1_000).unwrap(), 1);
        let remaining: Vec<String> = repo
            .list(false, 10)
            .unwrap()
            .into_iter()
            .map(|conflict| conflict.entity_id)
            .collect();
        assert_eq!(remaining, vec!["a2", "a3", "a4"]);
    }
}

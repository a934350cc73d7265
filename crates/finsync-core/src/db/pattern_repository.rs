//! Learned pattern repository implementation

use crate::error::{Error, Result};
use crate::models::{PatternKey, UserPattern};
use rusqlite::{params, Connection};

/// Trait for pattern storage operations
pub trait PatternRepository {
    /// Upsert every pattern in one transaction
    fn save_all(&self, patterns: &[(PatternKey, UserPattern)]) -> Result<()>;

    /// Load all patterns, ordered by key
    fn load_all(&self) -> Result<Vec<(PatternKey, UserPattern)>>;
}

/// `SQLite` implementation of `PatternRepository`
pub struct SqlitePatternRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePatternRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(PatternKey, String, f64, i64, i64)> {
        Ok((
            PatternKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }
}

impl PatternRepository for SqlitePatternRepository<'_> {
    fn save_all(&self, patterns: &[(PatternKey, UserPattern)]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO patterns (user_id, conflict_type, preferred_resolution, confidence, frequency, last_used)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(user_id, conflict_type) DO UPDATE SET
                    preferred_resolution = excluded.preferred_resolution,
                    confidence = excluded.confidence,
                    frequency = excluded.frequency,
                    last_used = excluded.last_used",
            )?;
            for (key, pattern) in patterns {
                stmt.execute(params![
                    key.user_id,
                    key.conflict_type,
                    pattern.preferred_resolution.as_str(),
                    pattern.confidence,
                    i64::try_from(pattern.frequency).unwrap_or(i64::MAX),
                    pattern.last_used,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!("Saved {} learned patterns", patterns.len());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<(PatternKey, UserPattern)>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, conflict_type, preferred_resolution, confidence, frequency, last_used
             FROM patterns
             ORDER BY user_id, conflict_type",
        )?;

        let rows = stmt
            .query_map([], Self::parse_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(key, preferred, confidence, frequency, last_used)| {
                let preferred_resolution = preferred.parse().map_err(|reason: String| {
                    Error::Database(format!("pattern {key}: {reason}"))
                })?;
                Ok((
                    key,
                    UserPattern {
                        preferred_resolution,
                        confidence,
                        frequency: u64::try_from(frequency).unwrap_or_default(),
                        last_used,
                    },
                ))
            })
            .collect()
    }
}

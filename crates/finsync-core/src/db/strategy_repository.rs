//! Strategy configuration repository implementation

use crate::error::Result;
use crate::models::{ResolutionStrategy, StrategyDefinition, TestCoverage};
use rusqlite::{params, Connection};

/// Trait for strategy storage operations
pub trait StrategyRepository {
    /// Replace the stored strategy set (the explicit admin operation)
    fn replace_all(&self, definitions: &[StrategyDefinition]) -> Result<()>;

    /// Load and validate stored strategies, with their last coverage
    fn load_all(&self) -> Result<Vec<ResolutionStrategy>>;

    /// Store the latest scenario harness summary for a strategy
    fn save_coverage(&self, strategy_id: &str, coverage: &TestCoverage) -> Result<()>;
}

/// `SQLite` implementation of `StrategyRepository`
pub struct SqliteStrategyRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStrategyRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl StrategyRepository for SqliteStrategyRepository<'_> {
    fn replace_all(&self, definitions: &[StrategyDefinition]) -> Result<()> {
        // Reject the whole set before touching the table
        for definition in definitions {
            ResolutionStrategy::try_from(definition.clone())?;
        }

        let now = chrono::Utc::now().timestamp_millis();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM strategies", [])?;
        for definition in definitions {
            tx.execute(
                "INSERT INTO strategies (id, definition, coverage, updated_at) VALUES (?, ?, NULL, ?)",
                params![definition.id.trim(), serde_json::to_string(definition)?, now],
            )?;
        }
        tx.commit()?;
        tracing::info!("Stored {} strategy definitions", definitions.len());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<ResolutionStrategy>> {
        let mut stmt = self
            .conn
            .prepare("SELECT definition, coverage FROM strategies ORDER BY id")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(definition, coverage)| {
                let definition: StrategyDefinition = serde_json::from_str(&definition)?;
                let mut strategy = ResolutionStrategy::try_from(definition)?;
                if let Some(coverage) = coverage {
                    strategy.coverage = serde_json::from_str(&coverage)?;
                }
                Ok(strategy)
            })
            .collect()
    }

    fn save_coverage(&self, strategy_id: &str, coverage: &TestCoverage) -> Result<()> {
        // Built-in strategies are not stored rows; their coverage is not kept
        self.conn.execute(
            "UPDATE strategies SET coverage = ? WHERE id = ?",
            params![serde_json::to_string(coverage)?, strategy_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::defaults::{self, SERVER_WINS, TIMESTAMP};
    use crate::error::Error;
    use crate::models::{Condition, RuleDefinition};
    use pretty_assertions::assert_eq;

    fn definitions() -> Vec<StrategyDefinition> {
        defaults::strategies()
            .iter()
            .filter(|strategy| strategy.id == TIMESTAMP || strategy.id == SERVER_WINS)
            .map(ResolutionStrategy::to_definition)
            .collect()
    }

    #[test]
    fn test_replace_and_load() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteStrategyRepository::new(db.connection());

        repo.replace_all(&definitions()).unwrap();
        let loaded = repo.load_all().unwrap();

        let ids: Vec<&str> = loaded.iter().map(|strategy| strategy.id.as_str()).collect();
        assert_eq!(ids, vec![SERVER_WINS, TIMESTAMP]);
        assert_eq!(loaded[1].rules().len(), 2);
    }

    #[test]
    fn test_invalid_definition_leaves_store_untouched() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteStrategyRepository::new(db.connection());
        repo.replace_all(&definitions()).unwrap();

        let mut broken = definitions();
        broken.push(StrategyDefinition {
            id: "broken".to_string(),
            name: String::new(),
            description: String::new(),
            entity_types: Vec::new(),
            rules: vec![RuleDefinition {
                id: "r1".to_string(),
                condition: Condition::Always,
                action: "custom".to_string(),
                handler: Some("teleport".to_string()),
                priority: 0,
            }],
        });

        assert!(matches!(
            repo.replace_all(&broken),
            Err(Error::InvalidStrategy { .. })
        ));
        assert_eq!(repo.load_all().unwrap().len(), 2);
    }

    #[test]
    fn test_save_coverage() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteStrategyRepository::new(db.connection());
        repo.replace_all(&definitions()).unwrap();

        let coverage = TestCoverage {
            scenarios_covered: 3,
            pass_rate: 1.0,
            last_run: Some(42),
        };
        repo.save_coverage(TIMESTAMP, &coverage).unwrap();

        let loaded = repo.load_all().unwrap();
        let timestamp = loaded.iter().find(|strategy| strategy.id == TIMESTAMP).unwrap();
        assert_eq!(timestamp.coverage, coverage);
    }
}

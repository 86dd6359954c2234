use rusqlite::{params, OptionalExtension};

use crate::db::DbPool;
use crate::engine::store::ExperimentStore;
use crate::engine::types::Experiment;
use crate::error::AppError;

/// SQLite-backed experiment store.
///
/// The whole experiment is persisted as its JSON body; status and the
/// timestamps are duplicated into columns so observer queries never parse
/// every record.
pub struct SqliteExperimentStore {
    pool: DbPool,
}

impl SqliteExperimentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl ExperimentStore for SqliteExperimentStore {
    fn save(&self, agent_id: &str, experiment: &Experiment) -> Result<(), AppError> {
        let body = serde_json::to_string(experiment)?;
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO experiments (id, agent_id, test_id, status, body, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(agent_id, id) DO UPDATE SET
                status = excluded.status,
                body = excluded.body,
                completed_at = excluded.completed_at",
            params![
                experiment.id,
                agent_id,
                experiment.test_id,
                experiment.status.as_str(),
                body,
                experiment.created_at.to_rfc3339(),
                experiment.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn load(&self, agent_id: &str, id: &str) -> Result<Option<Experiment>, AppError> {
        let conn = self.pool.get()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM experiments WHERE agent_id = ?1 AND id = ?2",
                params![agent_id, id],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    fn list_all(&self, agent_id: &str) -> Result<Vec<Experiment>, AppError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM experiments WHERE agent_id = ?1 ORDER BY created_at DESC",
        )?;
        let bodies = stmt.query_map(params![agent_id], |row| row.get::<_, String>(0))?;

        let mut experiments = Vec::new();
        for body in bodies {
            experiments.push(serde_json::from_str(&body?)?);
        }
        Ok(experiments)
    }

    fn delete(&self, agent_id: &str, id: &str) -> Result<bool, AppError> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "DELETE FROM experiments WHERE agent_id = ?1 AND id = ?2",
            params![agent_id, id],
        )?;
        Ok(rows > 0)
    }

    fn clear_all(&self, agent_id: &str) -> Result<(), AppError> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM experiments WHERE agent_id = ?1", params![agent_id])?;
        Ok(())
    }
}

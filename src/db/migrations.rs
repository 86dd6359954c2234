use rusqlite::Connection;

use crate::error::AppError;

/// Run the idempotent schema migration.
pub fn run(conn: &Connection) -> Result<(), AppError> {
    tracing::debug!("Running database migrations");

    conn.execute_batch(SCHEMA)?;

    tracing::info!("Database migrations complete");
    Ok(())
}

const SCHEMA: &str = r#"

-- ============================================================================
-- Experiments
-- ============================================================================
-- One row per experiment, keyed by (agent_id, id). The full record lives in
-- the JSON body; status and timestamps are lifted into columns for the
-- observer queries (list by recency, filter in-flight runs).

CREATE TABLE IF NOT EXISTS experiments (
    id           TEXT NOT NULL,
    agent_id     TEXT NOT NULL,
    test_id      TEXT NOT NULL,
    status       TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed')),
    body         TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    completed_at TEXT,
    PRIMARY KEY (agent_id, id)
);
CREATE INDEX IF NOT EXISTS idx_experiments_agent_created ON experiments(agent_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_experiments_status        ON experiments(status);

"#;

//! Database schema for job results

use anyhow::Result;
use rusqlite::Connection;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS job_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            workflow_name TEXT NOT NULL,
            status TEXT NOT NULL,
            total INTEGER NOT NULL,
            done INTEGER NOT NULL,
            error INTEGER NOT NULL,
            cancelled INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_job_runs_workflow ON job_runs(workflow_name);
        CREATE INDEX IF NOT EXISTS idx_job_runs_created ON job_runs(created_at);

        CREATE TABLE IF NOT EXISTS job_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            job_id INTEGER NOT NULL,
            item_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            input_bindings TEXT NOT NULL,
            output_rows TEXT NOT NULL,
            error_detail TEXT,
            raw_text TEXT,
            turnaround_ms INTEGER NOT NULL DEFAULT 0,
            started_at TEXT,
            finished_at TEXT,
            FOREIGN KEY(run_id) REFERENCES job_runs(id),
            UNIQUE(run_id, item_id)
        );

        CREATE INDEX IF NOT EXISTS idx_job_items_run ON job_items(run_id);
        CREATE INDEX IF NOT EXISTS idx_job_items_status ON job_items(status);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(tables.contains(&"job_runs".to_string()));
        assert!(tables.contains(&"job_items".to_string()));
    }
}

//! SQLite-backed result store

use super::schema::init_schema;
use crate::job::{ItemRecord, JobId, Progress};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// A finished job as recorded in the database
#[derive(Debug, Clone)]
pub struct StoredRun {
    pub id: i64,
    pub job_id: u64,
    pub workflow_name: String,
    pub status: String,
    pub total: usize,
    pub done: usize,
    pub error: usize,
    pub cancelled: usize,
    pub created_at: String,
}

/// One item row; JSON columns are kept as text
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub item_id: usize,
    pub status: String,
    pub input_bindings: String,
    pub output_rows: String,
    pub error_detail: Option<String>,
    pub raw_text: Option<String>,
    pub turnaround_ms: u64,
}

pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    /// Open or create a result database
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open result database at {}", path.display()))?;

        init_schema(&conn)?;

        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// `<data dir>/prompt-batch/results.db`
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir().context("Could not determine data directory")?;

        let dir = data_dir.join("prompt-batch");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create result directory at {}", dir.display()))?;

        Ok(dir.join("results.db"))
    }

    /// Write a finished job and all of its items in one transaction
    pub fn save_job(
        &mut self,
        job_id: JobId,
        workflow_name: &str,
        progress: &Progress,
        items: &[ItemRecord],
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO job_runs (job_id, workflow_name, status, total, done, error, cancelled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            (
                job_id.0 as i64,
                workflow_name,
                progress.job_status().to_string(),
                progress.total as i64,
                progress.done as i64,
                progress.error as i64,
                progress.cancelled as i64,
                &now,
            ),
        )?;
        let run_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO job_items (run_id, job_id, item_id, status, input_bindings, output_rows, error_detail, raw_text, turnaround_ms, started_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;

            for item in items {
                let bindings = serde_json::to_string(&item.input.bindings())?;
                let rows = serde_json::to_string(&item.output_rows)?;
                let error = item
                    .error
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;

                stmt.execute((
                    run_id,
                    job_id.0 as i64,
                    item.item_id as i64,
                    item.status.as_str(),
                    bindings,
                    rows,
                    error,
                    &item.raw_text,
                    item.turnaround_ms as i64,
                    item.started_at.map(|t| t.to_rfc3339()),
                    item.finished_at.map(|t| t.to_rfc3339()),
                ))
                .with_context(|| format!("Failed to store item {} of job {}", item.item_id, job_id))?;
            }
        }

        tx.commit()?;
        tracing::debug!(job_id = %job_id, run_id, items = items.len(), "Saved job results");
        Ok(run_id)
    }

    /// Most recent runs first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<StoredRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_id, workflow_name, status, total, done, error, cancelled, created_at
             FROM job_runs
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let runs = stmt
            .query_map([limit as i64], |row| {
                Ok(StoredRun {
                    id: row.get(0)?,
                    job_id: row.get::<_, i64>(1)? as u64,
                    workflow_name: row.get(2)?,
                    status: row.get(3)?,
                    total: row.get::<_, i64>(4)? as usize,
                    done: row.get::<_, i64>(5)? as usize,
                    error: row.get::<_, i64>(6)? as usize,
                    cancelled: row.get::<_, i64>(7)? as usize,
                    created_at: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    /// Items of one stored run, in item order
    pub fn items(&self, run_id: i64) -> Result<Vec<StoredItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, status, input_bindings, output_rows, error_detail, raw_text, turnaround_ms
             FROM job_items
             WHERE run_id = ?1
             ORDER BY item_id",
        )?;

        let items = stmt
            .query_map([run_id], |row| {
                Ok(StoredItem {
                    item_id: row.get::<_, i64>(0)? as usize,
                    status: row.get(1)?,
                    input_bindings: row.get(2)?,
                    output_rows: row.get(3)?,
                    error_detail: row.get(4)?,
                    raw_text: row.get(5)?,
                    turnaround_ms: row.get::<_, i64>(6)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }
}

//! Job read operations: full load at startup, single-row refresh and
//! cancel-flag polling.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;

use super::super::db::JobDb;
use super::super::types::{JobId, JobRecord, JobStatus, LogEntry};

impl JobDb {
    /// Load every persisted job with its stored log lines, oldest first.
    ///
    /// Rows whose JSON columns cannot be decoded are skipped with a warning
    /// so one damaged record does not block startup.
    pub async fn load_jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, status, progress, created_at, updated_at,
                started_at, finished_at, heartbeat_at, log_seq, cancel_requested,
                source_json, options_json, error_json, output_json, owner
            FROM jobs
            ORDER BY created_at ASC, queue_pos ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut logs = self.load_all_logs().await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            match decode_job(&row) {
                Ok(mut record) => {
                    record.log = logs.remove(&id).unwrap_or_default();
                    out.push(record);
                }
                Err(e) => tracing::warn!(job_id = %id, "skipping unreadable job row: {e:#}"),
            }
        }
        Ok(out)
    }

    /// Ids of jobs whose durable `cancel_requested` flag is set.
    ///
    /// Lets a worker process notice cancels written by another process.
    pub async fn cancel_requested_ids(&self) -> Result<Vec<JobId>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM jobs
            WHERE cancel_requested = 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    /// Current row of one job, without its log lines.
    pub async fn load_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query(
            r#"
            SELECT
                id, status, progress, created_at, updated_at,
                started_at, finished_at, heartbeat_at, log_seq, cancel_requested,
                source_json, options_json, error_json, output_json, owner
            FROM jobs
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_job).transpose()
    }

    async fn load_all_logs(&self) -> Result<HashMap<JobId, Vec<LogEntry>>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, seq, ts, message
            FROM job_logs
            ORDER BY job_id ASC, seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out: HashMap<JobId, Vec<LogEntry>> = HashMap::new();
        for row in rows {
            let job_id: String = row.get("job_id");
            let seq: i64 = row.get("seq");
            out.entry(job_id).or_default().push(LogEntry {
                seq: seq.max(0) as u64,
                ts: row.get("ts"),
                message: row.get("message"),
            });
        }
        Ok(out)
    }
}

fn decode_job(row: &SqliteRow) -> Result<JobRecord> {
    let status_str: String = row.get("status");
    let log_seq: i64 = row.get("log_seq");
    let source_json: String = row.get("source_json");
    let options_json: String = row.get("options_json");
    let error_json: Option<String> = row.get("error_json");
    let output_json: Option<String> = row.get("output_json");

    Ok(JobRecord {
        id: row.get("id"),
        status: JobStatus::from_str(&status_str),
        progress: row.get("progress"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        heartbeat_at: row.get("heartbeat_at"),
        source: serde_json::from_str(&source_json).context("source_json")?,
        options: serde_json::from_str(&options_json).context("options_json")?,
        log: Vec::new(),
        log_seq: log_seq.max(0) as u64,
        error: error_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("error_json")?,
        output: output_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("output_json")?,
        cancel_requested: row.get("cancel_requested"),
        owner: row.get("owner"),
    })
}

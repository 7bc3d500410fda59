//! Job write operations: snapshot upsert, ownership swaps, cancel flag and
//! removal.

use anyhow::Result;
use sqlx::Row;

use super::super::db::JobDb;
use super::super::types::{JobError, JobRecord, JobStatus, LogEntry};

/// What one flush writes: the job row plus log lines not yet on disk.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    /// Record fields; `record.log` and `record.owner` are ignored.
    pub record: JobRecord,
    /// Lines with `seq` above the last persisted one, ascending.
    pub new_logs: Vec<LogEntry>,
    /// Runner id of the process writing the snapshot.
    pub writer: String,
}

/// A compare-and-set status change, applied only if the row still matches.
#[derive(Debug, Clone)]
pub struct StatusSwap<'a> {
    pub id: &'a str,
    pub from: JobStatus,
    pub to: JobStatus,
    /// When set, the row's owner must equal this value (`None` = no owner).
    pub expected_owner: Option<Option<&'a str>>,
    /// Owner after the swap.
    pub new_owner: Option<&'a str>,
    pub error: Option<&'a JobError>,
    /// Log line recorded with the swap.
    pub message: &'a str,
    /// Caller's last known `log_seq`; the new line gets a seq above both this
    /// and the stored one.
    pub known_seq: u64,
    pub now: i64,
}

impl JobDb {
    /// Write a job snapshot in one transaction.
    ///
    /// The upsert never moves a row backwards: a terminal status stays,
    /// `progress`, `log_seq`, `updated_at` and `heartbeat_at` only grow, and
    /// `cancel_requested` is never cleared. This keeps a stale writer (another
    /// process holding an older copy of the job) from undoing newer state.
    /// While a row is owned by a runner other than `snap.writer`, its
    /// lifecycle fields and log lines are left alone. Log rows beyond
    /// `persisted_log_cap` are deleted oldest first.
    pub async fn save_snapshot(&self, snap: &JobSnapshot, persisted_log_cap: u64) -> Result<()> {
        let r = &snap.record;
        let source_json = serde_json::to_string(&r.source)?;
        let options_json = serde_json::to_string(&r.options)?;
        let error_json = r.error.as_ref().map(serde_json::to_string).transpose()?;
        let output_json = r.output.as_ref().map(serde_json::to_string).transpose()?;
        let log_seq = r.log_seq as i64;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, status, progress, created_at, updated_at,
                started_at, finished_at, heartbeat_at, log_seq, cancel_requested,
                source_json, options_json, error_json, output_json
            ) VALUES (?1, ?2, ?3, ?4, ?5,
                      ?6, ?7, ?8, ?9, ?10,
                      ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                status = CASE
                    WHEN jobs.status IN ('done', 'error', 'cancelled') THEN jobs.status
                    WHEN jobs.owner IS NOT NULL AND jobs.owner <> ?15 THEN jobs.status
                    WHEN jobs.status = 'running' AND excluded.status = 'queued' THEN jobs.status
                    ELSE excluded.status
                END,
                progress = MAX(jobs.progress, excluded.progress),
                updated_at = MAX(jobs.updated_at, excluded.updated_at),
                started_at = CASE
                    WHEN jobs.owner IS NOT NULL AND jobs.owner <> ?15 THEN jobs.started_at
                    ELSE COALESCE(excluded.started_at, jobs.started_at)
                END,
                finished_at = CASE
                    WHEN jobs.owner IS NOT NULL AND jobs.owner <> ?15 THEN jobs.finished_at
                    ELSE COALESCE(jobs.finished_at, excluded.finished_at)
                END,
                heartbeat_at = CASE
                    WHEN excluded.heartbeat_at IS NULL THEN jobs.heartbeat_at
                    WHEN jobs.heartbeat_at IS NULL THEN excluded.heartbeat_at
                    ELSE MAX(jobs.heartbeat_at, excluded.heartbeat_at)
                END,
                log_seq = MAX(jobs.log_seq, excluded.log_seq),
                cancel_requested = MAX(jobs.cancel_requested, excluded.cancel_requested),
                error_json = CASE
                    WHEN jobs.status IN ('done', 'error', 'cancelled') THEN jobs.error_json
                    WHEN jobs.owner IS NOT NULL AND jobs.owner <> ?15 THEN jobs.error_json
                    ELSE excluded.error_json
                END,
                output_json = CASE
                    WHEN jobs.status IN ('done', 'error', 'cancelled') THEN jobs.output_json
                    WHEN jobs.owner IS NOT NULL AND jobs.owner <> ?15 THEN jobs.output_json
                    ELSE excluded.output_json
                END
            "#,
        )
        .bind(&r.id)
        .bind(r.status.as_str())
        .bind(r.progress)
        .bind(r.created_at)
        .bind(r.updated_at)
        .bind(r.started_at)
        .bind(r.finished_at)
        .bind(r.heartbeat_at)
        .bind(log_seq)
        .bind(r.cancel_requested)
        .bind(source_json)
        .bind(options_json)
        .bind(error_json)
        .bind(output_json)
        .bind(&snap.writer)
        .execute(&mut *tx)
        .await?;

        for line in &snap.new_logs {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO job_logs (job_id, seq, ts, message)
                SELECT ?1, ?2, ?3, ?4
                WHERE NOT EXISTS (
                    SELECT 1 FROM jobs
                    WHERE id = ?1 AND owner IS NOT NULL AND owner <> ?5
                )
                "#,
            )
            .bind(&r.id)
            .bind(line.seq as i64)
            .bind(line.ts)
            .bind(&line.message)
            .bind(&snap.writer)
            .execute(&mut *tx)
            .await?;
        }

        let cutoff = log_seq - persisted_log_cap as i64;
        if cutoff > 0 {
            sqlx::query(
                r#"
                DELETE FROM job_logs
                WHERE job_id = ?1 AND seq <= ?2
                "#,
            )
            .bind(&r.id)
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Change a job's status only if it is still `swap.from` (and, when
    /// asked, still owned by `swap.expected_owner`), recording one log line.
    ///
    /// Returns the log seq given to the line, or `None` when the row did not
    /// match. A job with its cancel flag set is never moved to `running`.
    pub async fn swap_status(&self, swap: &StatusSwap<'_>) -> Result<Option<u64>> {
        let error_json = swap.error.map(serde_json::to_string).transpose()?;
        let (check_owner, expected) = match swap.expected_owner {
            Some(owner) => (true, owner),
            None => (false, None),
        };

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                status = ?2,
                owner = ?3,
                log_seq = MAX(log_seq, ?4) + 1,
                updated_at = MAX(updated_at, ?5),
                started_at = CASE WHEN ?2 = 'running' THEN ?5 ELSE started_at END,
                heartbeat_at = CASE
                    WHEN ?2 = 'running' THEN ?5
                    WHEN ?2 = 'queued' THEN NULL
                    ELSE heartbeat_at
                END,
                finished_at = CASE
                    WHEN ?2 IN ('done', 'error', 'cancelled') THEN ?5
                    ELSE finished_at
                END,
                cancel_requested = CASE WHEN ?2 = 'cancelled' THEN 1 ELSE cancel_requested END,
                error_json = COALESCE(?6, error_json)
            WHERE id = ?1
              AND status = ?7
              AND (?2 <> 'running' OR cancel_requested = 0)
              AND (?8 = 0 OR owner IS ?9)
            RETURNING log_seq
            "#,
        )
        .bind(swap.id)
        .bind(swap.to.as_str())
        .bind(swap.new_owner)
        .bind(swap.known_seq as i64)
        .bind(swap.now)
        .bind(error_json)
        .bind(swap.from.as_str())
        .bind(check_owner)
        .bind(expected)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let seq: i64 = row.get("log_seq");
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO job_logs (job_id, seq, ts, message)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(swap.id)
        .bind(seq)
        .bind(swap.now)
        .bind(swap.message)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(seq.max(0) as u64))
    }

    /// Set the durable cancel flag of a job that has not ended yet.
    ///
    /// Touches nothing else: the runner owning the job logs the request and
    /// stops it. Returns the job's status, or `None` if there is no such job.
    pub async fn flag_cancel(&self, id: &str) -> Result<Option<JobStatus>> {
        sqlx::query(
            r#"
            UPDATE jobs SET cancel_requested = 1
            WHERE id = ?1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        let status = sqlx::query_scalar::<_, String>(
            r#"
            SELECT status FROM jobs
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status.as_deref().map(JobStatus::from_str))
    }

    /// Permanently remove a job row and its log lines.
    ///
    /// File cleanup is handled separately by higher layers.
    pub async fn remove_job(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM job_logs
            WHERE job_id = ?1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

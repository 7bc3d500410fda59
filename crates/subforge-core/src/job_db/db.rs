//! Connection setup and schema for the job database. Row reads and writes
//! live in `jobs`.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Handle to the SQLite-backed job database.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/subforge/jobs.db` on Debian.
#[derive(Clone)]
pub struct JobDb {
    pub(crate) pool: Pool<Sqlite>,
    /// Runner lease files for this database (`runners/` next to the file).
    lease_dir: PathBuf,
}

impl JobDb {
    /// Open (or create) the default job database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("subforge")?;
        let db_path = xdg_dirs.get_state_home().join("jobs.db");
        Self::open_at(&db_path).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create state dir {}", parent.display()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .with_context(|| format!("open job database {}", path.display()))?;
        let lease_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join("runners"),
            _ => PathBuf::from("runners"),
        };
        let db = JobDb { pool, lease_dir };
        db.migrate().await?;
        Ok(db)
    }

    pub fn lease_dir(&self) -> &Path {
        &self.lease_dir
    }

    async fn migrate(&self) -> Result<()> {
        // - `queue_pos` keeps submission order stable when `created_at` ties.
        // - `log_seq` is the last sequence number handed out, even if the
        //   oldest lines were trimmed from `job_logs`.
        // - `owner` is the runner lease id while the job is running.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                queue_pos INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                started_at INTEGER,
                finished_at INTEGER,
                heartbeat_at INTEGER,
                log_seq INTEGER NOT NULL DEFAULT 0,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                source_json TEXT NOT NULL,
                options_json TEXT NOT NULL,
                error_json TEXT,
                output_json TEXT,
                owner TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        let has_owner = sqlx::query(
            r#"
            SELECT 1 FROM pragma_table_info('jobs')
            WHERE name = 'owner'
            "#,
        )
        .fetch_optional(&self.pool)
        .await?
        .is_some();
        if !has_owner {
            sqlx::query("ALTER TABLE jobs ADD COLUMN owner TEXT")
                .execute(&self.pool)
                .await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_logs (
                job_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                ts INTEGER NOT NULL,
                message TEXT NOT NULL,
                PRIMARY KEY (job_id, seq)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix milliseconds (for DB timestamps and heartbeats).
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// In-memory database for unit tests.
#[cfg(test)]
pub(crate) async fn open_memory() -> Result<JobDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let lease_dir = std::env::temp_dir().join(format!(
        "subforge-leases-{}",
        uuid::Uuid::new_v4().simple()
    ));
    let db = JobDb { pool, lease_dir };
    db.migrate().await?;
    Ok(db)
}

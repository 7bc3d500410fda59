use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Environment variable that overrides `backend.deepgram_api_key`.
pub const API_KEY_ENV: &str = "DEEPGRAM_API_KEY";

/// Retry policy parameters for backend calls (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per segment (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.6 = 600ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 0.6,
            max_delay_secs: 10,
        }
    }
}

/// Job store persistence and log retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How often dirty job metadata is flushed to SQLite.
    pub meta_flush_interval_ms: u64,
    /// Log lines kept in memory per job.
    pub log_max_lines: usize,
    /// Log lines kept on disk per job.
    pub persisted_log_max_lines: usize,
    /// A running job whose heartbeat is older than this is failed as orphaned.
    pub orphan_retention_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            meta_flush_interval_ms: 800,
            log_max_lines: 1000,
            persisted_log_max_lines: 500,
            orphan_retention_secs: 86_400,
        }
    }
}

/// Retention sweeper for finished jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Retention for `done` jobs, measured from `finished_at`.
    pub done_retention_secs: u64,
    /// Retention for `error` and `cancelled` jobs.
    pub error_retention_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 120,
            done_retention_secs: 7_200,
            error_retention_secs: 86_400,
        }
    }
}

/// Transcription backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deepgram_api_key: Option<String>,
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            deepgram_api_key: None,
            base_url: "https://api.deepgram.com".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Bounds applied when turning detected speech into backend segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Longer speech spans are force-split.
    pub max_segment_seconds: f64,
    /// Shorter detected spans are ignored.
    pub min_segment_seconds: f64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            max_segment_seconds: 15.0,
            min_segment_seconds: 0.25,
        }
    }
}

/// Global configuration loaded from `~/.config/subforge/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudioConfig {
    /// Jobs executed in parallel.
    pub job_workers: usize,
    /// Backend calls in flight per job.
    pub concurrency: usize,
    /// Submissions are refused once this many jobs are queued or running.
    pub max_queued_jobs: usize,
    /// Largest accepted upload.
    pub max_upload_mb: u64,
    /// Root for uploads and outputs (default: XDG data dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            job_workers: 1,
            concurrency: 20,
            max_queued_jobs: 200,
            max_upload_mb: 2048,
            data_dir: None,
            retry: None,
            store: StoreConfig::default(),
            cleanup: CleanupConfig::default(),
            backend: BackendConfig::default(),
            segmentation: SegmentationConfig::default(),
        }
    }
}

impl StudioConfig {
    /// Reject values outside the supported operating ranges.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=8).contains(&self.job_workers),
            "job_workers must be between 1 and 8 (got {})",
            self.job_workers
        );
        ensure!(
            (1..=64).contains(&self.concurrency),
            "concurrency must be between 1 and 64 (got {})",
            self.concurrency
        );
        ensure!(self.max_queued_jobs >= 1, "max_queued_jobs must be at least 1");
        ensure!(
            (200..=5_000).contains(&self.store.meta_flush_interval_ms),
            "store.meta_flush_interval_ms must be between 200 and 5000 (got {})",
            self.store.meta_flush_interval_ms
        );
        ensure!(
            self.store.orphan_retention_secs >= 60,
            "store.orphan_retention_secs must be at least 60 (got {})",
            self.store.orphan_retention_secs
        );
        ensure!(
            self.store.log_max_lines >= 10 && self.store.persisted_log_max_lines >= 10,
            "log line caps must be at least 10"
        );
        ensure!(
            (10..=600).contains(&self.backend.request_timeout_secs),
            "backend.request_timeout_secs must be between 10 and 600 (got {})",
            self.backend.request_timeout_secs
        );
        ensure!(
            (5.0..=30.0).contains(&self.segmentation.max_segment_seconds),
            "segmentation.max_segment_seconds must be between 5 and 30 (got {})",
            self.segmentation.max_segment_seconds
        );
        ensure!(
            self.segmentation.min_segment_seconds > 0.0
                && self.segmentation.min_segment_seconds < self.segmentation.max_segment_seconds,
            "segmentation.min_segment_seconds must be positive and below max_segment_seconds"
        );
        if let Some(retry) = &self.retry {
            ensure!(
                (1..=10).contains(&retry.max_attempts),
                "retry.max_attempts must be between 1 and 10 (got {})",
                retry.max_attempts
            );
            ensure!(retry.base_delay_secs >= 0.0, "retry.base_delay_secs must not be negative");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match &self.retry {
            Some(r) => RetryPolicy {
                max_attempts: r.max_attempts,
                base_delay: Duration::from_secs_f64(r.base_delay_secs.max(0.0)),
                max_delay: Duration::from_secs(r.max_delay_secs),
            },
            None => RetryPolicy::default(),
        }
    }

    /// Backend API key: `DEEPGRAM_API_KEY` wins over the file; blank keys count as missing.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .or_else(|| self.backend.deepgram_api_key.clone())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    pub fn orphan_after(&self) -> Duration {
        Duration::from_secs(self.store.orphan_retention_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.store.meta_flush_interval_ms)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("subforge")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<StudioConfig> {
    load_or_init_at(&config_path()?)
}

pub fn load_or_init_at(path: &Path) -> Result<StudioConfig> {
    if !path.exists() {
        let default_cfg = StudioConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: StudioConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}

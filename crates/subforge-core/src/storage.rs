//! On-disk layout for uploads and subtitle outputs.
//!
//! ```text
//! <data>/uploads/<job id>/<original name>
//! <data>/outputs/<job id>.srt
//! ```
//!
//! Outputs are written to a temp file in the same directory and renamed into
//! place, so readers never see a half-written subtitle.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::StudioConfig;
use crate::job_db::JobId;

const FALLBACK_UPLOAD_NAME: &str = "upload";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `data_dir` from config, else `~/.local/share/subforge`.
    pub fn from_config(cfg: &StudioConfig) -> Result<Self> {
        match &cfg.data_dir {
            Some(dir) => Ok(Self::new(dir)),
            None => {
                let xdg_dirs = xdg::BaseDirectories::with_prefix("subforge")?;
                Ok(Self::new(xdg_dirs.get_data_home()))
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn upload_dir(&self, id: &JobId) -> PathBuf {
        self.root.join("uploads").join(id)
    }

    pub fn output_path(&self, id: &JobId) -> PathBuf {
        self.root.join("outputs").join(format!("{id}.srt"))
    }

    /// Copy `src` into the job's upload dir. Returns the staged path. On
    /// failure the upload dir is removed again.
    pub fn stage_upload(&self, id: &JobId, src: &Path, original_name: &str) -> Result<PathBuf> {
        let dir = self.upload_dir(id);
        fs::create_dir_all(&dir).with_context(|| format!("create upload dir {}", dir.display()))?;
        let dest = dir.join(sanitize_file_name(original_name));
        if let Err(e) = fs::copy(src, &dest) {
            let _ = fs::remove_dir_all(&dir);
            return Err(e).with_context(|| format!("stage {} into {}", src.display(), dest.display()));
        }
        Ok(dest)
    }

    /// Remove the upload dir and output file of a job. Missing paths are fine.
    pub fn remove_job_artifacts(&self, id: &JobId) -> Result<()> {
        let dir = self.upload_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
        }
        let out = self.output_path(id);
        if out.exists() {
            fs::remove_file(&out).with_context(|| format!("remove {}", out.display()))?;
        }
        Ok(())
    }
}

/// Write `contents` to `path` via a synced temp file in the same directory
/// and an atomic rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).with_context(|| format!("temp file in {}", dir.display()))?;
    tmp.write_all(contents).context("write temp output")?;
    tmp.as_file().sync_all().context("sync temp output")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("rename output into {}", path.display()))?;
    Ok(())
}

/// Last path component of a client-supplied name, without control chars.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_UPLOAD_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Name offered for download: the upload's stem plus `.srt`.
pub fn download_name(original_name: &str) -> String {
    let name = sanitize_file_name(original_name);
    let stem = Path::new(&name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(FALLBACK_UPLOAD_NAME);
    format!("{stem}.srt")
}

//! Runner leases: which process owns a running job.
//!
//! Every job store takes a lease when it opens: a file `<id>.lock` in the
//! lease directory, held with an exclusive `flock` for the life of the
//! store. A runner is alive exactly while its lock file is locked, so a
//! crashed process releases its jobs without any timeout. Locks belong to
//! the open file, which makes two stores in one process behave like two
//! processes.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_EXT: &str = "lock";

/// A held runner lease. Dropping it releases the lock and removes the file.
#[derive(Debug)]
pub struct RunnerLease {
    id: String,
    path: PathBuf,
    _file: File,
}

impl RunnerLease {
    /// Take a fresh lease in `dir`, creating the directory if needed.
    /// Lock files left behind by dead runners are swept on the way.
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("create lease dir {}", dir.display()))?;
        sweep_stale(dir);

        let id = uuid::Uuid::new_v4().simple().to_string();
        // Lock under a temporary name so a `.lock` file is never visible unlocked.
        let pending = dir.join(format!("{id}.pending"));
        let path = lock_path(dir, &id);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&pending)
            .with_context(|| format!("open lease file {}", pending.display()))?;
        if !try_lock(&file)? {
            let _ = fs::remove_file(&pending);
            anyhow::bail!("lease file {} is already locked", pending.display());
        }
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("write lease file {}", pending.display()))?;
        fs::rename(&pending, &path)
            .with_context(|| format!("publish lease file {}", path.display()))?;

        tracing::debug!(runner = %id, path = %path.display(), "runner lease acquired");
        Ok(Self {
            id,
            path,
            _file: file,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for RunnerLease {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// True while the runner `owner` still holds its lease in `dir`.
pub fn is_held(dir: &Path, owner: &str) -> bool {
    if owner.is_empty() || !owner.chars().all(|c| c.is_ascii_alphanumeric()) {
        return false;
    }
    let path = lock_path(dir, owner);
    #[cfg(unix)]
    {
        let Ok(file) = File::open(&path) else {
            return false;
        };
        match try_lock(&file) {
            // We got the lock, so nobody else holds it.
            Ok(true) => false,
            Ok(false) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot test lease: {e:#}");
                true
            }
        }
    }
    #[cfg(not(unix))]
    {
        path.exists()
    }
}

fn lock_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.{LOCK_EXT}"))
}

/// Non-blocking exclusive lock. `Ok(false)` when another file holds it.
fn try_lock(file: &File) -> Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Ok(false);
        }
        Err(err).context("flock")
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

fn sweep_stale(dir: &Path) {
    #[cfg(unix)]
    {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOCK_EXT) {
                continue;
            }
            let Ok(file) = File::open(&path) else {
                continue;
            };
            if let Ok(true) = try_lock(&file) {
                tracing::debug!(path = %path.display(), "removing stale runner lease");
                let _ = fs::remove_file(&path);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_held_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let lease = RunnerLease::acquire(dir.path()).unwrap();
        let id = lease.id().to_string();
        assert!(is_held(dir.path(), &id));
        drop(lease);
        assert!(!is_held(dir.path(), &id));
        assert!(!dir.path().join(format!("{id}.lock")).exists());
    }

    #[test]
    fn two_leases_in_one_dir_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let a = RunnerLease::acquire(dir.path()).unwrap();
        let b = RunnerLease::acquire(dir.path()).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(is_held(dir.path(), a.id()));
        assert!(is_held(dir.path(), b.id()));
    }

    #[test]
    fn unknown_or_malformed_owner_is_not_held() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_held(dir.path(), "deadbeef"));
        assert!(!is_held(dir.path(), "../etc/passwd"));
        assert!(!is_held(dir.path(), ""));
    }

    #[cfg(unix)]
    #[test]
    fn unlocked_lock_file_counts_as_dead_and_is_swept() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("0123abcd.lock");
        fs::write(&stale, "4242\n").unwrap();
        assert!(!is_held(dir.path(), "0123abcd"));
        let _lease = RunnerLease::acquire(dir.path()).unwrap();
        assert!(!stale.exists());
    }
}

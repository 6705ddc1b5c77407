//! Merge lock
//!
//! One in-flight merge per `(project, scope)`. The lock is a sidecar file
//! `.ralph-ui/locks/<scope>.lock` holding an advisory exclusive `flock` and
//! the owner's PID. The guard releases on drop, so every exit path of a merge
//! (success, error, panic unwinding, cancelled future) gives the lock back.
//!
//! A lock file left behind by a crashed process holds no `flock`, so it is
//! simply locked again by the next merge.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::file_storage::{ensure_dir, get_locks_dir};
use crate::merge::error::{EngineResult, MergeError};
use crate::utils::sanitize_path_component;

/// Held merge lock; released when dropped
#[derive(Debug)]
pub struct MergeLock {
    file: Option<File>,
    path: PathBuf,
    scope: String,
}

impl MergeLock {
    pub fn lock_path(project_path: &Path, scope: &str) -> PathBuf {
        get_locks_dir(project_path).join(format!("{}.lock", sanitize_path_component(scope)))
    }

    /// Single non-blocking attempt. `Ok(None)` means another holder has it.
    pub fn try_acquire(project_path: &Path, scope: &str) -> EngineResult<Option<Self>> {
        let dir = get_locks_dir(project_path);
        ensure_dir(&dir).map_err(MergeError::Lock)?;
        let path = Self::lock_path(project_path, scope);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if is_contended(&e) {
                return Ok(None);
            }
            log::error!("[MergeLock] Failed to lock {:?}: {}", path, e);
            return Err(MergeError::Io(e));
        }

        // The previous holder may have removed the file between our open and lock
        if !same_file(&file, &path) {
            let _ = file.unlock();
            return Ok(None);
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        log::info!("[MergeLock] Acquired lock for '{}'", scope);
        Ok(Some(Self {
            file: Some(file),
            path,
            scope: scope.to_string(),
        }))
    }

    /// Wait up to `timeout` for the lock, polling every `poll`
    pub async fn acquire(
        project_path: &Path,
        scope: &str,
        timeout: Duration,
        poll: Duration,
    ) -> EngineResult<Self> {
        let started = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(project_path, scope)? {
                return Ok(lock);
            }
            if started.elapsed() >= timeout {
                log::warn!(
                    "[MergeLock] Gave up waiting for '{}' after {:.1}s",
                    scope,
                    started.elapsed().as_secs_f64()
                );
                return Err(MergeError::LockTimeout {
                    scope: scope.to_string(),
                    waited_secs: started.elapsed().as_secs_f64(),
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// PID recorded by the current holder, if any
    pub fn holder_pid(project_path: &Path, scope: &str) -> Option<u32> {
        fs::read_to_string(Self::lock_path(project_path, scope))
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Whether some process holds the lock right now
    pub fn is_locked(project_path: &Path, scope: &str) -> bool {
        let path = Self::lock_path(project_path, scope);
        match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => match file.try_lock_exclusive() {
                Ok(()) => {
                    let _ = file.unlock();
                    false
                }
                Err(e) => is_contended(&e),
            },
            Err(_) => false,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MergeLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            // Remove while still locked so waiters on this inode notice
            if let Err(e) = fs::remove_file(&self.path) {
                log::warn!("[MergeLock] Failed to remove {:?}: {}", self.path, e);
            }
            let _ = file.unlock();
            log::info!("[MergeLock] Released lock for '{}'", self.scope);
        }
    }
}

/// Another holder has the lock, as opposed to a real I/O failure
fn is_contended(error: &std::io::Error) -> bool {
    error.kind() == fs2::lock_contended_error().kind()
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(a), Ok(b)) => a.ino() == b.ino() && a.dev() == b.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}

//! Process-level locking of root directories.
//!
//! Every root directory gets a lock file:
//!
//! ```text
//! <root>/
//! ├─ littdb.lock       # PID of the owning process, advisory-locked while held
//! └─ <table>/...
//! ```
//!
//! A lock file whose PID belongs to a dead process is stale and is reclaimed
//! silently. `purge_locks` removes lock files unconditionally, which is how an
//! operator recovers after an unclean shutdown when PIDs have been reused.

use crate::error::{DbError, DbResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the lock inside each root.
pub const LOCK_FILE: &str = "littdb.lock";

/// An exclusive lock on one root directory.
///
/// The lock is released when dropped.
#[derive(Debug)]
pub struct RootLock {
    path: PathBuf,
    file: Option<File>,
}

impl RootLock {
    /// Acquires the lock for a root, creating the root if needed.
    ///
    /// # Errors
    ///
    /// Returns `LockContention` if a live process holds the lock, or an I/O
    /// error if the lock file cannot be written.
    pub fn acquire(root: &Path, purge: bool) -> DbResult<Self> {
        fs::create_dir_all(root)?;
        let path = root.join(LOCK_FILE);

        if path.exists() {
            if purge {
                warn!(path = %path.display(), "purging lock file");
                fs::remove_file(&path)?;
            } else {
                let pid = read_pid(&path);
                if is_held(&path) || pid.is_some_and(is_process_alive) {
                    return Err(DbError::LockContention {
                        path,
                        pid: pid.unwrap_or(0),
                    });
                }
                warn!(path = %path.display(), pid = ?pid, "reclaiming stale lock file");
                fs::remove_file(&path)?;
            }
        }

        let mut file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Lost a race with another opener.
                let pid = read_pid(&path).unwrap_or(0);
                return Err(DbError::LockContention { path, pid });
            }
            Err(e) => return Err(e.into()),
        };

        if file.try_lock_exclusive().is_err() {
            let pid = read_pid(&path).unwrap_or(0);
            return Err(DbError::LockContention { path, pid });
        }

        file.write_all(std::process::id().to_string().as_bytes())?;
        file.sync_all()?;
        debug!(path = %path.display(), "acquired root lock");

        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock and removes the lock file.
    pub fn release(mut self) -> DbResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> DbResult<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        // Only remove the file if it is still ours; a purge may have replaced it.
        if still_owned(&file, &self.path) {
            fs::remove_file(&self.path)?;
        }
        file.unlock()?;
        Ok(())
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(path = %self.path.display(), error = %e, "failed to release root lock");
        }
    }
}

/// Locks every root, releasing the ones already taken if any fails.
pub fn acquire_all(roots: &[PathBuf], purge: bool) -> DbResult<Vec<RootLock>> {
    let mut locks = Vec::with_capacity(roots.len());
    for root in roots {
        // Dropping `locks` on error releases what was acquired so far.
        locks.push(RootLock::acquire(root, purge)?);
    }
    Ok(locks)
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Returns true if some open handle holds the advisory lock.
fn is_held(path: &Path) -> bool {
    let Ok(file) = OpenOptions::new().read(true).write(true).open(path) else {
        return false;
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.unlock();
            false
        }
        Err(_) => true,
    }
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // Signal 0 performs the permission and existence checks only.
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    // Without a portable liveness check the advisory lock is authoritative.
    false
}

#[cfg(unix)]
fn still_owned(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(ours), Ok(on_disk)) => ours.ino() == on_disk.ino() && ours.dev() == on_disk.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_owned(_file: &File, path: &Path) -> bool {
    read_pid(path) == Some(std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_writes_pid() {
        let temp = tempdir().unwrap();
        let lock = RootLock::acquire(temp.path(), false).unwrap();
        assert_eq!(read_pid(lock.path()), Some(std::process::id()));
    }

    #[test]
    fn lock_prevents_second_acquire() {
        let temp = tempdir().unwrap();
        let _lock = RootLock::acquire(temp.path(), false).unwrap();

        let result = RootLock::acquire(temp.path(), false);
        assert!(matches!(result, Err(DbError::LockContention { .. })));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        {
            let _lock = RootLock::acquire(temp.path(), false).unwrap();
        }
        assert!(!temp.path().join(LOCK_FILE).exists());
        let _lock = RootLock::acquire(temp.path(), false).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn stale_lock_is_reclaimed() {
        let temp = tempdir().unwrap();
        // Far above any default pid_max, so no such process exists.
        fs::write(temp.path().join(LOCK_FILE), "2147483000").unwrap();

        let lock = RootLock::acquire(temp.path(), false).unwrap();
        assert_eq!(read_pid(lock.path()), Some(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn purge_overrides_live_lock() {
        let temp = tempdir().unwrap();
        let first = RootLock::acquire(temp.path(), false).unwrap();

        let second = RootLock::acquire(temp.path(), true).unwrap();
        drop(first);

        // The purging holder's file must survive the first holder's release.
        assert!(second.path().exists());
        second.release().unwrap();
        assert!(!temp.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn acquire_all_is_all_or_nothing() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let _held = RootLock::acquire(b.path(), false).unwrap();

        let roots = vec![a.path().to_path_buf(), b.path().to_path_buf()];
        assert!(acquire_all(&roots, false).is_err());
        assert!(!a.path().join(LOCK_FILE).exists());
    }
}

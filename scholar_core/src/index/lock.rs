//! Ownership lock for an index directory.
//!
//! `scholar.lock` holds the owner's PID. A process-wide registry catches a
//! second open from the same process before the file is even looked at.

use crate::error::IndexError;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

pub const LOCK_FILE: &str = "scholar.lock";

static OPEN_INDEXES: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn open_indexes() -> MutexGuard<'static, HashSet<PathBuf>> {
    OPEN_INDEXES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct IndexLock {
    dir: PathBuf,
    lock_path: PathBuf,
    released: bool,
}

impl IndexLock {
    /// Take ownership of `dir`, creating it if needed.
    ///
    /// A lock left by a dead process is removed and acquisition retried once.
    pub fn acquire(dir: &Path) -> Result<Self, IndexError> {
        fs::create_dir_all(dir)?;
        let dir = dir.canonicalize()?;
        let lock_path = dir.join(LOCK_FILE);

        let mut open = open_indexes();
        if open.contains(&dir) {
            return Err(IndexError::LockedBySameProcess { path: dir });
        }

        match create_lock_file(&lock_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                match read_owner(&lock_path) {
                    Some(pid) if pid == std::process::id() => {
                        return Err(IndexError::LockedBySameProcess { path: dir });
                    }
                    Some(pid) if process_alive(pid) => {
                        return Err(IndexError::LockHeld { path: dir, pid });
                    }
                    owner => {
                        warn!(
                            target: "scholar.index",
                            path = %lock_path.display(),
                            ?owner,
                            "Removing stale index lock"
                        );
                        match fs::remove_file(&lock_path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                            Err(e) => return Err(e.into()),
                        }
                        create_lock_file(&lock_path)?;
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }

        open.insert(dir.clone());
        debug!(target: "scholar.index", path = %dir.display(), "Index lock acquired");
        Ok(Self {
            dir,
            lock_path,
            released: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = fs::remove_file(&self.lock_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(target: "scholar.index", error = %e, "Failed to remove index lock");
            }
        }
        open_indexes().remove(&self.dir);
        debug!(target: "scholar.index", path = %self.dir.display(), "Index lock released");
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn create_lock_file(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    write!(file, "{}", std::process::id())?;
    file.sync_all()
}

/// PID recorded in the lock file; None when unreadable.
fn read_owner(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
pub(crate) fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) fn process_alive(pid: u32) -> bool {
    let outcome = std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    owner_alive_from_kill(pid, outcome)
}

/// A `kill -0` that could not run says nothing about the owner; keep its lock.
#[cfg(all(unix, any(test, not(target_os = "linux"))))]
fn owner_alive_from_kill(pid: u32, outcome: io::Result<std::process::ExitStatus>) -> bool {
    match outcome {
        Ok(status) => status.success(),
        Err(e) => {
            warn!(target: "scholar.index", pid, error = %e, "Cannot check lock owner; assuming it is alive");
            true
        }
    }
}

/// Liveness cannot be checked here; every recorded owner counts as running.
#[cfg(not(unix))]
pub(crate) fn process_alive(_pid: u32) -> bool {
    true
}

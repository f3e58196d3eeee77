//! Cross-process advisory task locks.
//!
//! Several independent processes (one per terminal/worktree) may mutate the
//! shared task store of one repository. Every mutating operation must hold
//! the per-task lock for its full duration; the lock is an advisory
//! exclusive file lock on `locks/<task-id>.lock` plus a holder record
//! (pid, hostname, acquisition time) written into the file.
//!
//! A lock whose recorded holder process no longer exists is a stale artifact
//! of a crashed process; it is reclaimed immediately with a warning instead
//! of being waited out. Release always happens through the [`TaskLock`]
//! guard's `Drop`, so panics and early returns cannot leak a held lock.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use uuid::Uuid;

/// How often contenders re-probe a held lock.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Error type for lock operations.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("task {task_id} is locked by {holder}")]
    Held { task_id: Uuid, holder: String },

    #[error("timed out after {waited:?} waiting for the lock on task {task_id} (held by {holder})")]
    Timeout { task_id: Uuid, holder: String, waited: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity of a lock holder, recorded inside the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Task the lock guards
    pub task_id: Uuid,
    /// Process id of the holder
    pub pid: u32,
    /// Hostname of the holder
    pub hostname: String,
    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn current(task_id: Uuid) -> Self {
        Self {
            task_id,
            pid: std::process::id(),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            acquired_at: Utc::now(),
        }
    }

    /// Short display form, e.g. `pid 4242 on buildhost`.
    pub fn display(&self) -> String {
        format!("pid {} on {}", self.pid, self.hostname)
    }
}

/// Grants exclusive per-task access across processes.
#[derive(Debug, Clone)]
pub struct LockManager {
    locks_dir: PathBuf,
}

impl LockManager {
    pub fn new(locks_dir: PathBuf) -> Self {
        Self { locks_dir }
    }

    fn lock_path(&self, task_id: Uuid) -> PathBuf {
        self.locks_dir.join(format!("{task_id}.lock"))
    }

    /// Acquire the exclusive lock for `task_id`.
    ///
    /// On contention this blocks up to `timeout`, re-probing the lock at a
    /// fixed interval; a zero timeout fails immediately with
    /// [`LockError::Held`]. A stale lock (recorded holder no longer running
    /// on this host) is reclaimed without waiting.
    pub fn acquire(&self, task_id: Uuid, timeout: Duration) -> Result<TaskLock, LockError> {
        fs::create_dir_all(&self.locks_dir)?;
        let path = self.lock_path(task_id);
        let started = Instant::now();
        let mut reclaimed = false;

        loop {
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;

            if file.try_lock_exclusive().is_ok() {
                write_holder(&mut file, &LockInfo::current(task_id))?;
                tracing::debug!("acquired lock for task {task_id}");
                return Ok(TaskLock { file, task_id });
            }

            let holder = read_holder(&mut file);
            if let Some(ref info) = holder {
                if !reclaimed && is_stale(info) {
                    tracing::warn!(
                        "reclaiming stale lock for task {task_id} held by dead process {}",
                        info.display()
                    );
                    // Dropping our handle releases nothing (we never locked);
                    // removing the file lets the next iteration start fresh.
                    reclaimed = true;
                    drop(file);
                    let _ = fs::remove_file(&path);
                    continue;
                }
            }

            let holder_display =
                holder.as_ref().map_or_else(|| "unknown holder".to_string(), LockInfo::display);

            if timeout.is_zero() {
                return Err(LockError::Held { task_id, holder: holder_display });
            }
            if started.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    task_id,
                    holder: holder_display,
                    waited: started.elapsed(),
                });
            }

            std::thread::sleep(POLL_INTERVAL.min(timeout.saturating_sub(started.elapsed())));
        }
    }

    /// Inspect the holder of a task's lock without acquiring it.
    pub fn holder(&self, task_id: Uuid) -> Option<LockInfo> {
        let mut file = File::open(self.lock_path(task_id)).ok()?;
        read_holder(&mut file)
    }

    /// Remove the lock file for a deleted task (best effort).
    pub fn remove(&self, task_id: Uuid) {
        let _ = fs::remove_file(self.lock_path(task_id));
    }
}

/// Scoped lock guard; clears the holder record and releases the advisory
/// lock when dropped.
///
/// The lock file itself is left in place: unlinking it would let a
/// contender that already holds an open handle lock the orphaned inode
/// while a newcomer locks a freshly created file, breaking mutual
/// exclusion. [`LockManager::remove`] cleans the file up on task deletion.
#[derive(Debug)]
pub struct TaskLock {
    file: File,
    task_id: Uuid,
}

impl TaskLock {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!("failed to unlock task {}: {}", self.task_id, e);
        }
        tracing::debug!("released lock for task {}", self.task_id);
    }
}

fn write_holder(file: &mut File, info: &LockInfo) -> Result<(), LockError> {
    let content = serde_yaml::to_string(info)
        .map_err(|e| LockError::Io(std::io::Error::other(e.to_string())))?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(())
}

fn read_holder(file: &mut File) -> Option<LockInfo> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut content).ok()?;
    // A contender may observe the file mid-write; treat unparseable content
    // as an unknown holder rather than an error.
    serde_yaml::from_str(&content).ok()
}

/// Whether the recorded holder is a dead process on this host.
///
/// Locks held on other hosts (shared filesystems) are never treated as
/// stale: we cannot probe a remote pid.
fn is_stale(info: &LockInfo) -> bool {
    let local_host = System::host_name().unwrap_or_else(|| "unknown".to_string());
    if info.hostname != local_host {
        return false;
    }
    if info.pid == std::process::id() {
        return false;
    }
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(info.pid)]), true);
    sys.process(Pid::from_u32(info.pid)).is_none()
}

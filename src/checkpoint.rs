//! Checkpoint ledger: append-only task snapshots with undo/redo.
//!
//! The ledger is an append-only sequence of snapshot files plus an integer
//! cursor, persisted under `work/<task-id>/checkpoints/`:
//!
//! ```text
//! checkpoints/checkpoint-1.yaml
//! checkpoints/checkpoint-2.yaml
//! checkpoints/cursor
//! ```
//!
//! The cursor always points at a valid index in `[0, len)`. Undo moves the
//! cursor down without deleting entries (so redo can restore them); the next
//! append truncates everything above the cursor, so undo and redo history
//! never diverge into a tree.
//!
//! Snapshot writes are atomic and carry a SHA-256 checksum. A crash between
//! snapshot-write and cursor-update leaves the ledger consistent on the next
//! read: the cursor defaults to the last fully-written entry, and a corrupt
//! entry truncates the visible ledger at the previous valid one.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::task::Task;
use crate::workspace::{atomic_write, atomic_write_yaml};

/// Error type for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("no checkpoint to restore")]
    NoCheckpoint,

    #[error("checkpoint ledger corrupt: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_yaml::Error),
}

/// One persisted snapshot of task state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Task this checkpoint belongs to
    pub task_id: Uuid,
    /// 1-based position in the ledger
    pub sequence: u32,
    /// When the checkpoint was taken
    pub timestamp: DateTime<Utc>,
    /// Label describing the operation that produced it
    pub label: String,
    /// Full task record at checkpoint time
    pub snapshot: Task,
    /// SHA-256 of the serialized snapshot, for corruption detection
    pub checksum: String,
}

/// Append-only checkpoint ledger for one task.
#[derive(Debug)]
pub struct Ledger {
    dir: PathBuf,
    entries: Vec<Checkpoint>,
    cursor: usize,
}

impl Ledger {
    /// Open (or create) the ledger under the given task directory.
    ///
    /// Reads entries in sequence order, stopping at the first missing or
    /// structurally invalid one; a stored cursor outside `[0, len)` is
    /// clamped to the last fully-written entry.
    pub fn open(task_dir: &Path) -> Result<Self, LedgerError> {
        let dir = task_dir.join("checkpoints");
        let mut entries = Vec::new();

        let mut n = 1u32;
        loop {
            let path = dir.join(format!("checkpoint-{n}.yaml"));
            if !path.exists() {
                break;
            }
            match read_entry(&path, n) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        "checkpoint {} is corrupt ({}); falling back to the last valid entry",
                        path.display(),
                        e
                    );
                    break;
                }
            }
            n += 1;
        }

        let cursor = match read_cursor(&dir) {
            Some(c) if c < entries.len() => c,
            _ if entries.is_empty() => 0,
            _ => entries.len() - 1,
        };

        Ok(Self { dir, entries, cursor })
    }

    /// Number of entries visible in the ledger.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current cursor position.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The checkpoint the cursor currently points at.
    pub fn current(&self) -> Option<&Checkpoint> {
        self.entries.get(self.cursor)
    }

    /// Append a snapshot of `task` and advance the cursor to the new end.
    ///
    /// Any redo entries above the cursor are discarded first, so a new
    /// checkpoint after an undo permanently forgets the undone branch.
    pub fn checkpoint(&mut self, task: &Task, label: &str) -> Result<u32, LedgerError> {
        fs::create_dir_all(&self.dir)?;

        // Truncate the redo tail.
        while self.entries.len() > self.cursor + 1 {
            if let Some(dropped) = self.entries.pop() {
                let path = self.dir.join(format!("checkpoint-{}.yaml", dropped.sequence));
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!("failed to remove discarded checkpoint {}: {}", path.display(), e);
                }
            }
        }

        let sequence = self.entries.len() as u32 + 1;
        let snapshot_yaml = serde_yaml::to_string(task)?;
        let entry = Checkpoint {
            task_id: task.id,
            sequence,
            timestamp: Utc::now(),
            label: label.to_string(),
            snapshot: task.clone(),
            checksum: digest(&snapshot_yaml),
        };

        atomic_write_yaml(&self.dir.join(format!("checkpoint-{sequence}.yaml")), &entry)
            .map_err(workspace_err)?;
        self.entries.push(entry);
        self.cursor = self.entries.len() - 1;
        self.write_cursor()?;

        Ok(sequence)
    }

    /// Move the cursor one entry down and return the snapshot to restore.
    ///
    /// Fails with [`LedgerError::NoCheckpoint`] when the cursor is already at
    /// the first entry. The entries above the new cursor are retained so
    /// [`Ledger::redo`] can restore them.
    pub fn undo(&mut self) -> Result<&Checkpoint, LedgerError> {
        if self.cursor == 0 || self.entries.is_empty() {
            return Err(LedgerError::NoCheckpoint);
        }
        self.cursor -= 1;
        self.write_cursor()?;
        Ok(&self.entries[self.cursor])
    }

    /// Move the cursor one entry up and return the snapshot to restore.
    pub fn redo(&mut self) -> Result<&Checkpoint, LedgerError> {
        if self.cursor + 1 >= self.entries.len() {
            return Err(LedgerError::NoCheckpoint);
        }
        self.cursor += 1;
        self.write_cursor()?;
        Ok(&self.entries[self.cursor])
    }

    fn write_cursor(&self) -> Result<(), LedgerError> {
        atomic_write(&self.dir.join("cursor"), self.cursor.to_string().as_bytes())?;
        Ok(())
    }
}

fn workspace_err(e: crate::workspace::WorkspaceError) -> LedgerError {
    match e {
        crate::workspace::WorkspaceError::Io(io) => LedgerError::Io(io),
        crate::workspace::WorkspaceError::Serde(s) => LedgerError::Serde(s),
        other => LedgerError::Corrupt(other.to_string()),
    }
}

fn digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn read_entry(path: &Path, expected_sequence: u32) -> Result<Checkpoint, LedgerError> {
    let content = fs::read_to_string(path)?;
    let entry: Checkpoint = serde_yaml::from_str(&content)
        .map_err(|e| LedgerError::Corrupt(format!("unparseable entry: {e}")))?;

    if entry.sequence != expected_sequence {
        return Err(LedgerError::Corrupt(format!(
            "sequence mismatch: expected {expected_sequence}, found {}",
            entry.sequence
        )));
    }

    let snapshot_yaml = serde_yaml::to_string(&entry.snapshot)?;
    if digest(&snapshot_yaml) != entry.checksum {
        return Err(LedgerError::Corrupt("checksum mismatch".to_string()));
    }

    Ok(entry)
}

fn read_cursor(dir: &Path) -> Option<usize> {
    let content = fs::read_to_string(dir.join("cursor")).ok()?;
    content.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Phase, TaskSource};
    use tempfile::tempdir;

    fn sample_task() -> Task {
        Task::new(
            TaskSource {
                provider: "local".to_string(),
                key: "demo".to_string(),
                title: "Demo".to_string(),
            },
            "task/demo".to_string(),
        )
    }

    #[test]
    fn test_checkpoint_advances_cursor() {
        let temp = tempdir().unwrap();
        let mut ledger = Ledger::open(temp.path()).unwrap();
        let task = sample_task();

        ledger.checkpoint(&task, "created").unwrap();
        ledger.checkpoint(&task, "planned").unwrap();

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.cursor(), 1);
        assert_eq!(ledger.current().unwrap().label, "planned");
    }

    #[test]
    fn test_undo_at_start_fails() {
        let temp = tempdir().unwrap();
        let mut ledger = Ledger::open(temp.path()).unwrap();
        assert!(matches!(ledger.undo(), Err(LedgerError::NoCheckpoint)));

        ledger.checkpoint(&sample_task(), "created").unwrap();
        assert!(matches!(ledger.undo(), Err(LedgerError::NoCheckpoint)));
    }

    #[test]
    fn test_undo_then_redo_restores_exact_snapshot() {
        let temp = tempdir().unwrap();
        let mut ledger = Ledger::open(temp.path()).unwrap();

        let mut task = sample_task();
        ledger.checkpoint(&task, "created").unwrap();
        task.phase = Phase::planning();
        ledger.checkpoint(&task, "planned").unwrap();

        let undone = ledger.undo().unwrap();
        assert_eq!(undone.snapshot.phase, Phase::idle());

        let redone = ledger.redo().unwrap();
        assert_eq!(redone.snapshot.phase, Phase::planning());
        assert_eq!(redone.label, "planned");
    }

    #[test]
    fn test_append_after_undo_discards_redo_tail() {
        let temp = tempdir().unwrap();
        let mut ledger = Ledger::open(temp.path()).unwrap();

        let mut task = sample_task();
        ledger.checkpoint(&task, "created").unwrap();
        task.phase = Phase::planning();
        ledger.checkpoint(&task, "planned").unwrap();
        task.phase = Phase::implementing();
        ledger.checkpoint(&task, "implementing").unwrap();

        ledger.undo().unwrap();
        ledger.undo().unwrap();
        assert_eq!(ledger.cursor(), 0);

        task.phase = Phase::abandoned();
        ledger.checkpoint(&task, "abandoned").unwrap();

        assert_eq!(ledger.len(), 2);
        assert!(matches!(ledger.redo(), Err(LedgerError::NoCheckpoint)));
        assert!(!temp.path().join("checkpoints/checkpoint-3.yaml").exists());
    }

    #[test]
    fn test_reopen_preserves_cursor() {
        let temp = tempdir().unwrap();
        let mut task = sample_task();
        {
            let mut ledger = Ledger::open(temp.path()).unwrap();
            ledger.checkpoint(&task, "created").unwrap();
            task.phase = Phase::planning();
            ledger.checkpoint(&task, "planned").unwrap();
            ledger.undo().unwrap();
        }

        let ledger = Ledger::open(temp.path()).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.cursor(), 0);
    }

    #[test]
    fn test_missing_cursor_defaults_to_last_entry() {
        let temp = tempdir().unwrap();
        {
            let mut ledger = Ledger::open(temp.path()).unwrap();
            ledger.checkpoint(&sample_task(), "created").unwrap();
            ledger.checkpoint(&sample_task(), "again").unwrap();
        }
        fs::remove_file(temp.path().join("checkpoints/cursor")).unwrap();

        let ledger = Ledger::open(temp.path()).unwrap();
        assert_eq!(ledger.cursor(), 1);
    }

    #[test]
    fn test_corrupt_entry_truncates_ledger() {
        let temp = tempdir().unwrap();
        {
            let mut ledger = Ledger::open(temp.path()).unwrap();
            ledger.checkpoint(&sample_task(), "created").unwrap();
            ledger.checkpoint(&sample_task(), "second").unwrap();
        }
        fs::write(temp.path().join("checkpoints/checkpoint-2.yaml"), "not: [valid").unwrap();

        let ledger = Ledger::open(temp.path()).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.cursor(), 0);
        assert_eq!(ledger.current().unwrap().label, "created");
    }

    #[test]
    fn test_tampered_snapshot_fails_checksum() {
        let temp = tempdir().unwrap();
        let mut task = sample_task();
        {
            let mut ledger = Ledger::open(temp.path()).unwrap();
            ledger.checkpoint(&task, "created").unwrap();
            task.phase = Phase::planning();
            ledger.checkpoint(&task, "planned").unwrap();
        }

        // Flip the snapshot phase without updating the checksum.
        let path = temp.path().join("checkpoints/checkpoint-2.yaml");
        let tampered = fs::read_to_string(&path).unwrap().replace("planning", "reviewing");
        fs::write(&path, tampered).unwrap();

        let ledger = Ledger::open(temp.path()).unwrap();
        assert_eq!(ledger.len(), 1);
    }
}

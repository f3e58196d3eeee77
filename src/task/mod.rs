//! Task model and durable task store.
//!
//! A task is the unit of orchestrated work: it carries a lifecycle phase,
//! its external linkage (which tracker item it came from), and the worktree
//! and branch it is being developed on. Tasks are owned exclusively by the
//! [`TaskStore`] and mutated only through state machine transitions.

mod store;

pub use store::{StoreError, TaskStore};

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named step in a task's lifecycle.
///
/// The built-in lifecycle is `idle → planning → implementing → reviewing →
/// done` with `abandoned` reachable from every non-terminal phase, but
/// workflow plugins may splice additional phases into the graph, so the type
/// is an open string newtype rather than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Phase(String);

impl Phase {
    /// Initial phase of every new task.
    pub fn idle() -> Self {
        Self("idle".to_string())
    }

    pub fn planning() -> Self {
        Self("planning".to_string())
    }

    pub fn implementing() -> Self {
        Self("implementing".to_string())
    }

    pub fn reviewing() -> Self {
        Self("reviewing".to_string())
    }

    pub fn done() -> Self {
        Self("done".to_string())
    }

    pub fn abandoned() -> Self {
        Self("abandoned".to_string())
    }

    /// Create a phase from an arbitrary name (plugin-defined phases).
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Phase {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// External linkage of a task to its tracker item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSource {
    /// Provider name (e.g. `github`, `linear`, or `local`)
    pub provider: String,
    /// Key of the work unit within the provider (issue number, ticket id)
    pub key: String,
    /// Title of the work unit at fetch time
    pub title: String,
}

/// A single orchestrated unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: Uuid,
    /// Current lifecycle phase
    pub phase: Phase,
    /// External linkage
    pub source: TaskSource,
    /// Isolated worktree path, if worktree isolation is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<PathBuf>,
    /// Branch the task is developed on
    pub branch: String,
    /// Number of quality-retry attempts consumed while implementing
    #[serde(default)]
    pub quality_retries: u32,
    /// Accumulated failure feedback from quality-retry attempts
    #[serde(default)]
    pub feedback: Vec<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task in the initial phase.
    pub fn new(source: TaskSource, branch: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            phase: Phase::idle(),
            source,
            worktree: None,
            branch,
            quality_retries: 0,
            feedback: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Short display id (first segment of the UUID).
    pub fn short_id(&self) -> String {
        self.id.to_string().chars().take(8).collect()
    }
}

/// A record of one conductor operation, persisted to the task's session
/// history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// When the operation ran
    pub timestamp: DateTime<Utc>,
    /// Operation name (e.g. `plan`, `undo`)
    pub operation: String,
    /// Phase before the operation
    pub from_phase: Phase,
    /// Phase after the operation
    pub to_phase: Phase,
    /// Human-readable outcome summary
    pub outcome: String,
    /// Non-critical effect failures observed during the operation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

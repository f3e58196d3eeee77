//! # Mehrhof
//!
//! Multi-worktree orchestrator for AI-assisted development tasks.
//!
//! Mehrhof drives development tasks through a guarded lifecycle
//! (plan → implement → review → finish) across one or more concurrently
//! active worktrees of a repository. Task state lives in a plain file store
//! under `.mehrhof/`, mutations are serialized across processes by advisory
//! per-task locks, every committed transition is checkpointed for undo/redo,
//! and out-of-process plugins can extend providers, agents, and the phase
//! graph itself.
//!
//! ## Quick Start
//!
//! ```bash
//! # Install
//! cargo install mehrhof
//!
//! # Initialize a repository and start a task
//! mrh init
//! mrh start github:142
//! mrh plan && mrh implement && mrh review && mrh finish
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::use_self)]

pub mod agent;
pub mod checkpoint;
pub mod conductor;
pub mod config;
pub mod engine;
pub mod lock;
pub mod plugin;
pub mod provider;
pub mod task;
pub mod vcs;
pub mod workspace;
pub mod worktree;

pub use agent::{Agent, AgentContext, AgentError, CliAgent, PluginAgent};
pub use checkpoint::{Checkpoint, Ledger, LedgerError};
pub use conductor::{Conductor, ConductorError, TaskView};
pub use config::{Config, ConfigError};
pub use engine::{
    Effect, EffectContext, EffectError, EngineError, Guard, Machine, PhaseGraph, PhaseInsertion,
    PhasePosition, TransitionOutcome,
};
pub use lock::{LockError, LockInfo, LockManager, TaskLock};
pub use plugin::{PluginError, PluginHost, PluginKind, PluginManifest, PluginStatus};
pub use provider::{parse_work_ref, Provider, ProviderError, WorkRef, WorkUnit};
pub use task::{Phase, SessionRecord, StoreError, Task, TaskSource, TaskStore};
pub use vcs::{GitVcs, Vcs, VcsError};
pub use workspace::{Workspace, WorkspaceError};
pub use worktree::{RegistryError, WorktreeMapping, WorktreeRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "mehrhof";

/// Short alias
pub const APP_ALIAS: &str = "mrh";

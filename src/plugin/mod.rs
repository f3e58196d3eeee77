//! Out-of-process plugin system.
//!
//! Plugins extend phase behavior without being compiled into the host. Each
//! plugin is declared by a TOML manifest in a global or project-local plugin
//! directory, spawned as a subprocess at startup, and spoken to over
//! line-delimited JSON-RPC on its standard input/output.
//!
//! # Plugin kinds
//!
//! - **provider**: fetch/list/update work units from an external tracker
//! - **agent**: invoke an AI backend
//! - **workflow**: guard/effect/phase-insertion hooks for the state machine
//!
//! A plugin that times out, crashes, or answers with a malformed envelope is
//! marked unavailable for the remainder of the process; the host never
//! respawns a plugin mid-session.

mod host;
mod manifest;
pub mod protocol;
mod registry;
mod workflow;

pub use host::{PluginHost, PluginStatus};
pub use manifest::{Entrypoint, PluginManifest, PluginMetadata, MANIFEST_FILE};
pub use registry::{discover, global_plugins_dir, DiscoveredPlugin};
pub use workflow::{apply_workflow_contributions, WorkflowEffect, WorkflowGuard};

use serde::{Deserialize, Serialize};

/// Plugin kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// External task-source adapter
    Provider,
    /// AI backend adapter
    Agent,
    /// State machine extension
    Workflow,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider => f.write_str("provider"),
            Self::Agent => f.write_str("agent"),
            Self::Workflow => f.write_str("workflow"),
        }
    }
}

/// Error type for plugin operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin {0} is not loaded or was marked unavailable")]
    Unavailable(String),

    #[error("plugin {plugin} timed out handling {method}")]
    Timeout { plugin: String, method: String },

    #[error("plugin {plugin} exited unexpectedly")]
    Crashed { plugin: String },

    #[error("plugin {plugin} sent a malformed response: {message}")]
    Protocol { plugin: String, message: String },

    #[error("plugin {plugin} does not implement {method}")]
    UnknownMethod { plugin: String, method: String },

    #[error("plugin {plugin} returned an error: {message}")]
    Call { plugin: String, message: String },

    #[error("handshake with plugin {plugin} failed: {message}")]
    Handshake { plugin: String, message: String },

    #[error("failed to spawn plugin {plugin}: {source}")]
    Spawn {
        plugin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid plugin manifest: {0}")]
    InvalidManifest(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

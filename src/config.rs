//! Configuration management.
//!
//! Handles loading and saving configuration from `.mehrhof/config.yaml`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::workspace::atomic_write;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Worktree isolation settings
    pub worktree: WorktreeConfig,

    /// Agent settings
    pub agent: AgentConfig,

    /// Plugin host settings
    pub plugins: PluginsConfig,

    /// Quality gate settings
    pub quality: QualityConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default provider name for bare work-unit references
    pub default_provider: Option<String>,

    /// How long a mutating command waits for the task lock, in seconds
    pub lock_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { default_provider: None, lock_timeout_secs: 10 }
    }
}

/// Worktree isolation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorktreeConfig {
    /// Whether to create an isolated worktree per task
    pub enabled: bool,

    /// Directory (relative to the repository root) holding task worktrees
    pub base_dir: PathBuf,

    /// Prefix for generated branch names
    pub branch_prefix: String,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self { enabled: true, base_dir: PathBuf::from(".worktrees"), branch_prefix: "task/".to_string() }
    }
}

/// Agent invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Command to invoke for AI assistance (receives the prompt on stdin)
    pub command: String,

    /// Extra arguments passed to the agent command
    pub args: Vec<String>,

    /// Name of an agent-kind plugin to use instead of the command
    pub plugin: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { command: "claude".to_string(), args: vec!["-p".to_string()], plugin: None }
    }
}

/// Plugin host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Whether to discover and spawn plugins at startup
    pub enabled: bool,

    /// Per-call deadline for plugin requests, in seconds
    pub call_timeout_secs: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self { enabled: true, call_timeout_secs: 30 }
    }
}

/// Quality gate settings for the implementing retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Shell command run after each implementation attempt; non-zero exit
    /// feeds its output back to the agent as failure feedback
    pub check_command: Option<String>,

    /// Maximum number of quality-retry attempts before the task is parked
    pub max_retries: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self { check_command: None, max_retries: 3 }
    }
}

impl Config {
    /// Load configuration from a file, falling back to defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)?;
        atomic_write(path, content.as_bytes())?;
        Ok(())
    }
}

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

//! Plugin manifest parsing and validation.
//!
//! A plugin manifest is a TOML file (`plugin.toml`) that describes a
//! plugin's metadata and the subprocess entrypoint the host spawns for it.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{PluginError, PluginKind};

/// Manifest file name inside a plugin directory.
pub const MANIFEST_FILE: &str = "plugin.toml";

/// Plugin manifest containing metadata and the entrypoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin metadata.
    pub plugin: PluginMetadata,
    /// Subprocess entrypoint.
    pub entrypoint: Entrypoint,
}

/// Plugin metadata section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Plugin name (unique identifier).
    pub name: String,
    /// Plugin version (semver).
    pub version: String,
    /// Plugin kind.
    pub kind: PluginKind,
    /// Plugin description.
    #[serde(default)]
    pub description: Option<String>,
    /// Protocol version the plugin requires.
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    super::protocol::PROTOCOL_VERSION.to_string()
}

/// How the host spawns the plugin subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entrypoint {
    /// Command to run.
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables (values may reference `${VARS}`).
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: Option<String>,
}

impl PluginManifest {
    /// Parse a manifest from TOML string.
    pub fn from_toml(content: &str) -> Result<Self, PluginError> {
        toml::from_str(content).map_err(|e| PluginError::InvalidManifest(e.to_string()))
    }

    /// Parse a manifest from a file.
    pub fn from_file(path: &Path) -> Result<Self, PluginError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PluginError::InvalidManifest(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Validate the manifest.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.plugin.name.is_empty() {
            return Err(PluginError::InvalidManifest("plugin name is required".to_string()));
        }
        if !self.plugin.name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
            return Err(PluginError::InvalidManifest(
                "plugin name must contain only alphanumeric characters, hyphens, and underscores"
                    .to_string(),
            ));
        }
        if self.plugin.version.split('.').count() < 2 {
            return Err(PluginError::InvalidManifest(
                "version must be in semver format (e.g. 1.0.0)".to_string(),
            ));
        }
        if self.entrypoint.command.is_empty() {
            return Err(PluginError::InvalidManifest("entrypoint command is required".to_string()));
        }
        Ok(())
    }

    /// Check if the manifest's protocol requirement is compatible with the
    /// host's protocol version (major versions must match).
    pub fn is_compatible_with(&self, host_protocol: &str) -> bool {
        let required = self.plugin.protocol.split('.').next();
        let available = host_protocol.split('.').next();
        match (required, available) {
            (Some(r), Some(a)) if !r.is_empty() && !a.is_empty() => r == a,
            _ => false,
        }
    }
}

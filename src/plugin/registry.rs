//! Plugin discovery.
//!
//! Manifests are discovered in two directories: the global plugin directory
//! (`~/.config/mehrhof/plugins/<name>/plugin.toml`) and the project-local
//! one (`.mehrhof/plugins/<name>/plugin.toml`). On a name collision the
//! project-local plugin overrides the global one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::manifest::{PluginManifest, MANIFEST_FILE};
use super::protocol::PROTOCOL_VERSION;

/// A plugin discovered on disk: its manifest plus the directory it lives in.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    /// Parsed and validated manifest
    pub manifest: PluginManifest,
    /// Directory containing the manifest (used as default working directory)
    pub dir: PathBuf,
}

/// The global plugin directory, if a config directory exists on this system.
pub fn global_plugins_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mehrhof").join("plugins"))
}

/// Discover plugins from the global and project-local plugin directories.
///
/// Invalid manifests and protocol-incompatible plugins are skipped with a
/// warning; a project-local plugin replaces a global one of the same name.
pub fn discover(global_dir: Option<&Path>, project_dir: &Path) -> Vec<DiscoveredPlugin> {
    let mut by_name: HashMap<String, DiscoveredPlugin> = HashMap::new();

    if let Some(dir) = global_dir {
        for plugin in scan_dir(dir) {
            by_name.insert(plugin.manifest.plugin.name.clone(), plugin);
        }
    }
    for plugin in scan_dir(project_dir) {
        let name = plugin.manifest.plugin.name.clone();
        if by_name.insert(name.clone(), plugin).is_some() {
            tracing::debug!("project-local plugin {name} overrides the global one");
        }
    }

    let mut plugins: Vec<DiscoveredPlugin> = by_name.into_values().collect();
    plugins.sort_by(|a, b| a.manifest.plugin.name.cmp(&b.manifest.plugin.name));
    plugins
}

fn scan_dir(dir: &Path) -> Vec<DiscoveredPlugin> {
    let mut found = Vec::new();
    if !dir.is_dir() {
        return found;
    }

    for entry in WalkDir::new(dir).min_depth(2).max_depth(2).into_iter().flatten() {
        if entry.file_name() != MANIFEST_FILE {
            continue;
        }
        let path = entry.path();
        let manifest = match PluginManifest::from_file(path) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("skipping plugin manifest {}: {e}", path.display());
                continue;
            }
        };
        if let Err(e) = manifest.validate() {
            tracing::warn!("skipping invalid plugin at {}: {e}", path.display());
            continue;
        }
        if !manifest.is_compatible_with(PROTOCOL_VERSION) {
            tracing::warn!(
                "skipping plugin {} (requires protocol {}, host speaks {})",
                manifest.plugin.name,
                manifest.plugin.protocol,
                PROTOCOL_VERSION
            );
            continue;
        }
        let plugin_dir = path.parent().unwrap_or(dir).to_path_buf();
        found.push(DiscoveredPlugin { manifest, dir: plugin_dir });
    }
    found
}

//! Task-source providers.
//!
//! The core treats every external task-tracking system uniformly through the
//! [`Provider`] trait; concrete integrations live out of process as
//! provider-kind plugins. Work-unit references are written
//! `provider:key` (e.g. `github:142`); a bare key uses the configured
//! default provider, or a purely local work unit when none is configured.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::plugin::{PluginError, PluginHost};

/// A unit of work fetched from a task source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Key within the provider (issue number, ticket id)
    pub key: String,
    /// Title
    pub title: String,
    /// Longer description, if the source carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Current status at the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Web URL of the work unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Error type for provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no provider named {0} is loaded")]
    UnknownProvider(String),

    #[error("invalid work unit reference: {0}")]
    InvalidReference(String),

    #[error("provider returned malformed data: {0}")]
    MalformedData(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Uniform interface over task-tracking systems.
pub trait Provider: Send + Sync {
    /// Provider name (matches the reference prefix).
    fn name(&self) -> &str;

    /// Fetch a single work unit by key.
    fn fetch(&self, key: &str) -> Result<WorkUnit, ProviderError>;

    /// List work units, optionally filtered.
    fn list(&self, filter: Option<&str>) -> Result<Vec<WorkUnit>, ProviderError>;

    /// Push a status change back to the source.
    fn update_status(&self, key: &str, status: &str) -> Result<(), ProviderError>;
}

/// A parsed work-unit reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRef {
    /// Explicit provider prefix, if the reference carried one
    pub provider: Option<String>,
    /// Work unit key
    pub key: String,
}

static REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z][a-z0-9_-]*):(.+)$").unwrap());

/// Parse a `provider:key` reference; a bare string is a key without a
/// provider.
pub fn parse_work_ref(reference: &str) -> Result<WorkRef, ProviderError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(ProviderError::InvalidReference("empty reference".to_string()));
    }
    if let Some(captures) = REF_PATTERN.captures(reference) {
        return Ok(WorkRef {
            provider: Some(captures[1].to_string()),
            key: captures[2].to_string(),
        });
    }
    Ok(WorkRef { provider: None, key: reference.to_string() })
}

/// A provider backed by a provider-kind plugin (`provider.*` methods).
pub struct PluginProvider {
    host: Arc<PluginHost>,
    plugin: String,
}

impl PluginProvider {
    pub fn new(host: Arc<PluginHost>, plugin: impl Into<String>) -> Self {
        Self { host, plugin: plugin.into() }
    }
}

impl Provider for PluginProvider {
    fn name(&self) -> &str {
        &self.plugin
    }

    fn fetch(&self, key: &str) -> Result<WorkUnit, ProviderError> {
        let value = self.host.call(&self.plugin, "provider.fetch", json!({ "ref": key }))?;
        serde_json::from_value(value).map_err(|e| ProviderError::MalformedData(e.to_string()))
    }

    fn list(&self, filter: Option<&str>) -> Result<Vec<WorkUnit>, ProviderError> {
        let value = self.host.call(&self.plugin, "provider.list", json!({ "filter": filter }))?;
        let items = value
            .get("items")
            .cloned()
            .ok_or_else(|| ProviderError::MalformedData("missing items".to_string()))?;
        serde_json::from_value(items).map_err(|e| ProviderError::MalformedData(e.to_string()))
    }

    fn update_status(&self, key: &str, status: &str) -> Result<(), ProviderError> {
        self.host.call(
            &self.plugin,
            "provider.update_status",
            json!({ "ref": key, "status": status }),
        )?;
        Ok(())
    }
}

/// Fallback provider for tasks without an external tracker.
///
/// `fetch` echoes the key back as the title; `list` is empty; status updates
/// are no-ops.
pub struct LocalProvider;

impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn fetch(&self, key: &str) -> Result<WorkUnit, ProviderError> {
        Ok(WorkUnit {
            key: key.to_string(),
            title: key.to_string(),
            description: None,
            status: None,
            url: None,
        })
    }

    fn list(&self, _filter: Option<&str>) -> Result<Vec<WorkUnit>, ProviderError> {
        Ok(Vec::new())
    }

    fn update_status(&self, _key: &str, _status: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

//! Plugin protocol types.
//!
//! Plugins speak line-delimited JSON-RPC 2.0 over their standard
//! input/output: one request, response, or notification per line. Method
//! namespaces are `provider.*`, `agent.*`, and `workflow.*`; the
//! `initialize` handshake exchanges protocol version and declared
//! capabilities.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version spoken by this host.
pub const PROTOCOL_VERSION: &str = "1.0";

/// JSON-RPC error code: method not found.
pub const METHOD_NOT_FOUND: i32 = -32601;

/// JSON-RPC error code: internal error.
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Parameters (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0".to_string(), id: id.into(), method: method.into(), params }
    }
}

/// JSON-RPC request ID (can be string or number).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// String ID
    String(String),
    /// Numeric ID
    Number(i64),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// Request ID
    pub id: RequestId,
    /// Result (if successful)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Extract the result value, or the typed error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

/// JSON-RPC 2.0 notification (no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

// ============================================================================
// Handshake message types
// ============================================================================

/// `initialize` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version the host speaks
    pub protocol_version: String,
    /// Host info
    pub host_info: HostInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            host_info: HostInfo {
                name: "mehrhof".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// Host info sent during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    /// Host name
    pub name: String,
    /// Host version
    pub version: String,
}

/// `initialize` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the plugin speaks
    pub protocol_version: String,
    /// Plugin info
    pub plugin_info: PluginInfo,
    /// Declared capabilities
    #[serde(default)]
    pub capabilities: PluginCapabilities,
}

/// Plugin info from the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name
    pub name: String,
    /// Plugin version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Capabilities a plugin declares during the handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginCapabilities {
    /// Provider capabilities (`provider.*` methods available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderCapabilities>,
    /// Agent capabilities (`agent.*` methods available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentCapabilities>,
    /// Workflow capabilities (`workflow.*` hooks and phase insertions)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowCapabilities>,
}

/// Provider capability declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Status values the provider accepts for `provider.update_status`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<String>,
}

/// Agent capability declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCapabilities {
    /// Model identifiers the agent backend can serve
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
}

/// Workflow capability declaration: phase insertions, extra guards, extra
/// effects, and an optional quality hook for the implementing retry loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowCapabilities {
    /// Phases to splice into the graph
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<PhaseContribution>,
    /// Extra guards on existing transitions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guards: Vec<GuardContribution>,
    /// Extra effects on existing transitions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<EffectContribution>,
    /// Name of a `workflow.guard` hook evaluated after each implementation
    /// attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

/// A phase insertion declared by a workflow plugin.
///
/// Exactly one of `before`/`after` must name an existing phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseContribution {
    /// Name of the new phase
    pub name: String,
    /// Insert before this phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    /// Insert after this phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// An extra guard on the transition into `phase`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardContribution {
    /// Transition target the guard attaches to
    pub phase: String,
    /// Guard name passed back through `workflow.guard`
    pub name: String,
}

/// An extra effect on the transition into `phase`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectContribution {
    /// Transition target the effect attaches to
    pub phase: String,
    /// Effect name passed back through `workflow.effect`
    pub name: String,
    /// Whether a failure rolls the transition back
    #[serde(default)]
    pub critical: bool,
}

/// Result of a `workflow.guard` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardCheckResult {
    /// Whether the guard passed
    pub pass: bool,
    /// Failing reason when `pass` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of an `agent.invoke` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResult {
    /// Agent output
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"initialize\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_response_into_result() {
        let response: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"output":"hi"}}"#).unwrap();
        let value = response.into_result().unwrap();
        assert_eq!(value["output"], "hi");
    }

    #[test]
    fn test_error_response() {
        let response: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":"abc","error":{"code":-32601,"message":"no such method"}}"#,
        )
        .unwrap();
        let err = response.into_result().unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert_eq!(err.to_string(), "[-32601] no such method");
    }

    #[test]
    fn test_initialize_result_with_workflow_capabilities() {
        let json = r#"{
            "protocolVersion": "1.0",
            "pluginInfo": {"name": "sec"},
            "capabilities": {
                "workflow": {
                    "phases": [{"name": "security-scan", "after": "reviewing"}],
                    "guards": [{"phase": "done", "name": "scan-clean"}],
                    "effects": [{"phase": "security-scan", "name": "run-scan", "critical": true}]
                }
            }
        }"#;
        let result: InitializeResult = serde_json::from_str(json).unwrap();
        let workflow = result.capabilities.workflow.unwrap();
        assert_eq!(workflow.phases[0].after.as_deref(), Some("reviewing"));
        assert!(workflow.phases[0].before.is_none());
        assert!(workflow.effects[0].critical);
    }

    #[test]
    fn test_minimal_initialize_result() {
        let json = r#"{"protocolVersion":"1.0","pluginInfo":{"name":"gh"}}"#;
        let result: InitializeResult = serde_json::from_str(json).unwrap();
        assert!(result.capabilities.provider.is_none());
        assert!(result.capabilities.workflow.is_none());
    }
}

//! Plugin host: spawns and supervises plugin subprocesses.
//!
//! Each plugin runs as a child process with piped stdin/stdout (stderr is
//! inherited so plugin diagnostics reach the terminal). A dedicated reader
//! thread parses stdout lines and forwards them over a channel; calls write
//! one request line and wait on the channel under a per-call deadline.
//!
//! A call that times out, a write that fails, or a reader channel that
//! disconnects marks the plugin unavailable for the remainder of the
//! process lifetime; in-flight callers get a typed timeout/crash error and
//! later callers get [`PluginError::Unavailable`]. There is no automatic
//! respawn mid-session.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use super::manifest::Entrypoint;
use super::protocol::{
    InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    PluginCapabilities, RequestId, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use super::registry::DiscoveredPlugin;
use super::{PluginError, PluginKind};

/// A line the reader thread forwarded: a parsed response, or the protocol
/// violation it ran into.
type InboundLine = Result<JsonRpcResponse, String>;

struct PluginHandle {
    name: String,
    kind: PluginKind,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    inbound: Mutex<Receiver<InboundLine>>,
    next_id: AtomicI64,
    available: AtomicBool,
    capabilities: PluginCapabilities,
}

/// Status of one loaded plugin, for display.
#[derive(Debug, Clone)]
pub struct PluginStatus {
    pub name: String,
    pub kind: PluginKind,
    pub available: bool,
}

/// Spawns and supervises out-of-process plugins.
pub struct PluginHost {
    call_timeout: Duration,
    plugins: Mutex<HashMap<String, Arc<PluginHandle>>>,
}

impl PluginHost {
    /// Create a host with the given per-call deadline.
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout, plugins: Mutex::new(HashMap::new()) }
    }

    /// Spawn and handshake every discovered plugin.
    ///
    /// A plugin that fails to spawn or handshake is skipped with a warning;
    /// the host itself never fails to load.
    pub fn load(&self, discovered: &[DiscoveredPlugin]) {
        for plugin in discovered {
            let name = plugin.manifest.plugin.name.clone();
            match self.spawn_and_handshake(plugin) {
                Ok(handle) => {
                    tracing::info!("loaded {} plugin {name}", handle.kind);
                    self.plugins.lock().insert(name, Arc::new(handle));
                }
                Err(e) => {
                    tracing::warn!("plugin {name} unavailable: {e}");
                }
            }
        }
    }

    fn spawn_and_handshake(&self, plugin: &DiscoveredPlugin) -> Result<PluginHandle, PluginError> {
        let name = plugin.manifest.plugin.name.clone();
        let mut child = build_command(&plugin.manifest.entrypoint, &plugin.dir)
            .spawn()
            .map_err(|e| PluginError::Spawn { plugin: name.clone(), source: e })?;

        let stdin = child.stdin.take().ok_or_else(|| PluginError::Handshake {
            plugin: name.clone(),
            message: "failed to capture stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| PluginError::Handshake {
            plugin: name.clone(),
            message: "failed to capture stdout".to_string(),
        })?;

        let (tx, rx) = mpsc::channel();
        let reader_name = name.clone();
        std::thread::spawn(move || read_loop(&reader_name, stdout, &tx));

        let handle = PluginHandle {
            name: name.clone(),
            kind: plugin.manifest.plugin.kind,
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            inbound: Mutex::new(rx),
            next_id: AtomicI64::new(1),
            available: AtomicBool::new(true),
            capabilities: PluginCapabilities::default(),
        };

        let params = serde_json::to_value(InitializeParams::default())?;
        let result = self.call_on(&handle, "initialize", params)?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| PluginError::Handshake {
                plugin: name.clone(),
                message: format!("invalid initialize result: {e}"),
            })?;

        if init.protocol_version.split('.').next() != PROTOCOL_VERSION.split('.').next() {
            return Err(PluginError::Handshake {
                plugin: name,
                message: format!(
                    "protocol version mismatch: plugin speaks {}, host speaks {PROTOCOL_VERSION}",
                    init.protocol_version
                ),
            });
        }

        // Tell the plugin the handshake is complete.
        let note = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: "initialized".to_string(),
            params: None,
        };
        let line = serde_json::to_string(&note)?;
        {
            let mut stdin = handle.stdin.lock();
            writeln!(stdin, "{line}").and_then(|()| stdin.flush()).map_err(|e| {
                PluginError::Handshake { plugin: handle.name.clone(), message: e.to_string() }
            })?;
        }

        Ok(PluginHandle { capabilities: init.capabilities, ..handle })
    }

    /// Call a method on a loaded plugin with the default deadline.
    pub fn call(&self, plugin: &str, method: &str, params: Value) -> Result<Value, PluginError> {
        let handle = self
            .plugins
            .lock()
            .get(plugin)
            .cloned()
            .ok_or_else(|| PluginError::Unavailable(plugin.to_string()))?;
        self.call_on(&handle, method, params)
    }

    fn call_on(
        &self,
        handle: &PluginHandle,
        method: &str,
        params: Value,
    ) -> Result<Value, PluginError> {
        if !handle.available.load(Ordering::SeqCst) {
            return Err(PluginError::Unavailable(handle.name.clone()));
        }

        let id = handle.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, Some(params));
        let line = serde_json::to_string(&request)?;
        tracing::debug!("plugin {} <- {line}", handle.name);

        {
            let mut stdin = handle.stdin.lock();
            if writeln!(stdin, "{line}").and_then(|()| stdin.flush()).is_err() {
                handle.available.store(false, Ordering::SeqCst);
                return Err(PluginError::Crashed { plugin: handle.name.clone() });
            }
        }

        let deadline = Instant::now() + self.call_timeout;
        let inbound = handle.inbound.lock();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                handle.available.store(false, Ordering::SeqCst);
                return Err(PluginError::Timeout {
                    plugin: handle.name.clone(),
                    method: method.to_string(),
                });
            }

            match inbound.recv_timeout(remaining) {
                Ok(Ok(response)) if response.id == RequestId::Number(id) => {
                    tracing::debug!("plugin {} -> response to {method}", handle.name);
                    return match response.into_result() {
                        Ok(value) => Ok(value),
                        Err(e) if e.code == METHOD_NOT_FOUND => Err(PluginError::UnknownMethod {
                            plugin: handle.name.clone(),
                            method: method.to_string(),
                        }),
                        Err(e) => Err(PluginError::Call {
                            plugin: handle.name.clone(),
                            message: e.to_string(),
                        }),
                    };
                }
                Ok(Ok(stale)) => {
                    // Response to an earlier call that already timed out.
                    tracing::debug!("plugin {}: dropping stale response {:?}", handle.name, stale.id);
                }
                Ok(Err(message)) => {
                    handle.available.store(false, Ordering::SeqCst);
                    return Err(PluginError::Protocol { plugin: handle.name.clone(), message });
                }
                Err(RecvTimeoutError::Timeout) => {
                    handle.available.store(false, Ordering::SeqCst);
                    return Err(PluginError::Timeout {
                        plugin: handle.name.clone(),
                        method: method.to_string(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    handle.available.store(false, Ordering::SeqCst);
                    return Err(PluginError::Crashed { plugin: handle.name.clone() });
                }
            }
        }
    }

    /// Whether a plugin with this name is loaded and available.
    pub fn is_available(&self, plugin: &str) -> bool {
        self.plugins
            .lock()
            .get(plugin)
            .is_some_and(|h| h.available.load(Ordering::SeqCst))
    }

    /// Names of loaded plugins of the given kind.
    pub fn plugins_of_kind(&self, kind: PluginKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .plugins
            .lock()
            .values()
            .filter(|h| h.kind == kind)
            .map(|h| h.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Status of every loaded plugin.
    pub fn statuses(&self) -> Vec<PluginStatus> {
        let mut statuses: Vec<PluginStatus> = self
            .plugins
            .lock()
            .values()
            .map(|h| PluginStatus {
                name: h.name.clone(),
                kind: h.kind,
                available: h.available.load(Ordering::SeqCst),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Declared workflow capabilities, per workflow plugin.
    pub fn workflow_capabilities(
        &self,
    ) -> Vec<(String, super::protocol::WorkflowCapabilities)> {
        let mut caps: Vec<_> = self
            .plugins
            .lock()
            .values()
            .filter(|h| h.kind == PluginKind::Workflow)
            .filter_map(|h| {
                h.capabilities.workflow.clone().map(|w| (h.name.clone(), w))
            })
            .collect();
        caps.sort_by(|a, b| a.0.cmp(&b.0));
        caps
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        for handle in self.plugins.lock().values() {
            let mut child = handle.child.lock();
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn build_command(entrypoint: &Entrypoint, dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(&entrypoint.command);
    cmd.args(&entrypoint.args);
    for (key, value) in &entrypoint.env {
        // Expand ${VARS} in manifest values from the host environment.
        let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
        cmd.env(key, expanded.as_ref());
    }
    match &entrypoint.cwd {
        Some(cwd) => cmd.current_dir(cwd),
        None => cmd.current_dir(dir),
    };
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());
    cmd
}

/// Reader thread body: forward parsed responses, log notifications, report
/// protocol violations, and hang up on EOF.
fn read_loop(
    plugin: &str,
    stdout: std::process::ChildStdout,
    tx: &mpsc::Sender<InboundLine>,
) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                if tx.send(Err(format!("unparseable envelope: {e}"))).is_err() {
                    return;
                }
                continue;
            }
        };

        if value.get("id").is_some() {
            match serde_json::from_value::<JsonRpcResponse>(value) {
                Ok(response) => {
                    if tx.send(Ok(response)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    if tx.send(Err(format!("invalid response envelope: {e}"))).is_err() {
                        return;
                    }
                }
            }
        } else if let Some(method) = value.get("method").and_then(Value::as_str) {
            tracing::debug!("plugin {plugin} notification: {method}");
        } else if tx.send(Err("envelope has neither id nor method".to_string())).is_err() {
            return;
        }
    }
    tracing::debug!("plugin {plugin} closed its stdout");
    // Dropping tx disconnects the channel; a waiting caller observes the
    // crash instead of hanging.
}

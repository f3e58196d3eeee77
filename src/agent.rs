//! AI agent invocation.
//!
//! The engine never performs inference itself; it hands a prompt and task
//! context to an [`Agent`] collaborator. The bundled implementations shell
//! out to a configured CLI (prompt on stdin, output on stdout) or route the
//! call through an agent-kind plugin.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::plugin::protocol::InvokeResult;
use crate::plugin::{PluginError, PluginHost};
use crate::task::Task;

/// Error type for agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to run agent command {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("agent returned malformed data: {0}")]
    MalformedData(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Task context handed to the agent alongside the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    /// Task title
    pub title: String,
    /// Current phase name
    pub phase: String,
    /// Working directory the agent should operate in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Accumulated quality-retry feedback, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback: Vec<String>,
}

impl AgentContext {
    /// Build the context for a task, using its worktree as working
    /// directory when one exists.
    pub fn for_task(task: &Task) -> Self {
        Self {
            title: task.source.title.clone(),
            phase: task.phase.to_string(),
            working_dir: task.worktree.clone(),
            feedback: task.feedback.clone(),
        }
    }
}

/// AI backend boundary: one synchronous call per invocation.
pub trait Agent: Send + Sync {
    fn invoke(&self, prompt: &str, context: &AgentContext) -> Result<String, AgentError>;
}

/// Agent that shells out to an external CLI.
///
/// The prompt is written to the command's stdin; stdout is the output.
pub struct CliAgent {
    command: String,
    args: Vec<String>,
}

impl CliAgent {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self { command: command.into(), args }
    }
}

impl Agent for CliAgent {
    fn invoke(&self, prompt: &str, context: &AgentContext) -> Result<String, AgentError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        if let Some(ref dir) = context.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("invoking agent: {} {:?}", self.command, self.args);
        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Spawn { command: self.command.clone(), source: e })?;

        if let Some(mut stdin) = child.stdin.take() {
            // An agent that does not read stdin closes the pipe early; let
            // the exit status decide the outcome instead of the EPIPE.
            if let Err(e) = stdin.write_all(prompt.as_bytes()) {
                tracing::debug!("agent did not consume the prompt: {e}");
            }
            // Dropping stdin closes it so the agent sees EOF.
        }

        let output = child
            .wait_with_output()
            .map_err(|e| AgentError::Spawn { command: self.command.clone(), source: e })?;

        if !output.status.success() {
            return Err(AgentError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Agent backed by an agent-kind plugin (`agent.invoke`).
pub struct PluginAgent {
    host: Arc<PluginHost>,
    plugin: String,
}

impl PluginAgent {
    pub fn new(host: Arc<PluginHost>, plugin: impl Into<String>) -> Self {
        Self { host, plugin: plugin.into() }
    }
}

impl Agent for PluginAgent {
    fn invoke(&self, prompt: &str, context: &AgentContext) -> Result<String, AgentError> {
        let value = self.host.call(
            &self.plugin,
            "agent.invoke",
            json!({ "prompt": prompt, "context": context }),
        )?;
        let result: InvokeResult = serde_json::from_value(value)
            .map_err(|e| AgentError::MalformedData(e.to_string()))?;
        Ok(result.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> AgentContext {
        AgentContext {
            title: "Demo".to_string(),
            phase: "planning".to_string(),
            working_dir: None,
            feedback: Vec::new(),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_cli_agent_pipes_prompt_through() {
        let agent = CliAgent::new("cat", Vec::new());
        let output = agent.invoke("hello agent", &context()).unwrap();
        assert_eq!(output, "hello agent");
    }

    #[test]
    #[cfg(unix)]
    fn test_cli_agent_surfaces_failure() {
        let agent = CliAgent::new("false", Vec::new());
        assert!(matches!(agent.invoke("x", &context()), Err(AgentError::Failed { .. })));
    }

    #[test]
    fn test_cli_agent_missing_command() {
        let agent = CliAgent::new("definitely-not-a-real-command-mehrhof", Vec::new());
        assert!(matches!(agent.invoke("x", &context()), Err(AgentError::Spawn { .. })));
    }
}

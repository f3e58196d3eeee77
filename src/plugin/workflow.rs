//! Workflow plugin hooks bridged into the state machine.
//!
//! Workflow plugins declare phase insertions, guards, and effects during the
//! handshake; this module turns those declarations into [`Guard`] and
//! [`Effect`] implementations that call back into the plugin at transition
//! time, and merges the declared phases into the graph once at load time.

use std::sync::Arc;

use serde_json::json;

use crate::engine::{
    Effect, EffectContext, EffectError, EngineError, Guard, PhaseGraph, PhaseInsertion,
    PhasePosition,
};
use crate::task::{Phase, Task, TaskStore};

use super::protocol::GuardCheckResult;
use super::PluginHost;

/// A guard evaluated by a workflow plugin through `workflow.guard`.
pub struct WorkflowGuard {
    host: Arc<PluginHost>,
    plugin: String,
    guard: String,
}

impl WorkflowGuard {
    pub fn new(host: Arc<PluginHost>, plugin: impl Into<String>, guard: impl Into<String>) -> Self {
        Self { host, plugin: plugin.into(), guard: guard.into() }
    }
}

impl Guard for WorkflowGuard {
    fn name(&self) -> &str {
        &self.guard
    }

    fn check(&self, task: &Task, _store: &TaskStore) -> Result<(), String> {
        let params = json!({ "guard": self.guard, "task": task });
        // A plugin failure fails the guard closed: the transition is
        // rejected rather than silently skipping the check.
        let value = self
            .host
            .call(&self.plugin, "workflow.guard", params)
            .map_err(|e| format!("workflow plugin call failed: {e}"))?;
        let result: GuardCheckResult = serde_json::from_value(value)
            .map_err(|e| format!("workflow plugin sent an invalid guard result: {e}"))?;
        if result.pass {
            Ok(())
        } else {
            Err(result.reason.unwrap_or_else(|| format!("{} rejected the transition", self.guard)))
        }
    }
}

/// An effect executed by a workflow plugin through `workflow.effect`.
pub struct WorkflowEffect {
    host: Arc<PluginHost>,
    plugin: String,
    effect: String,
}

impl WorkflowEffect {
    pub fn new(
        host: Arc<PluginHost>,
        plugin: impl Into<String>,
        effect: impl Into<String>,
    ) -> Self {
        Self { host, plugin: plugin.into(), effect: effect.into() }
    }
}

impl Effect for WorkflowEffect {
    fn name(&self) -> &str {
        &self.effect
    }

    fn run(&self, ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
        let params = json!({ "effect": self.effect, "task": ctx.task });
        self.host
            .call(&self.plugin, "workflow.effect", params)
            .map_err(|e| EffectError::new(e.to_string()))?;
        Ok(())
    }
}

/// Merge every loaded workflow plugin's declared phases, guards, and effects
/// into the graph.
///
/// Called once at load time; the caller re-validates the composed graph, so
/// a contribution that would introduce a cycle or an unreachable phase
/// rejects the merge.
pub fn apply_workflow_contributions(
    graph: &mut PhaseGraph,
    host: &Arc<PluginHost>,
) -> Result<(), EngineError> {
    for (plugin, capabilities) in host.workflow_capabilities() {
        for phase in &capabilities.phases {
            let position = match (&phase.before, &phase.after) {
                (Some(anchor), None) => PhasePosition::Before(Phase::new(anchor.clone())),
                (None, Some(anchor)) => PhasePosition::After(Phase::new(anchor.clone())),
                _ => {
                    return Err(EngineError::GuardRejected {
                        guard: "plugin-merge".to_string(),
                        reason: format!(
                            "plugin {plugin} phase {} must declare exactly one of before/after",
                            phase.name
                        ),
                    });
                }
            };
            graph.insert_phase(&PhaseInsertion { name: Phase::new(phase.name.clone()), position })?;
            tracing::info!("plugin {plugin} inserted phase {}", phase.name);
        }

        for guard in &capabilities.guards {
            graph.add_guard(
                &Phase::new(guard.phase.clone()),
                Box::new(WorkflowGuard::new(host.clone(), plugin.clone(), guard.name.clone())),
            )?;
        }

        for effect in &capabilities.effects {
            graph.add_effect(
                &Phase::new(effect.phase.clone()),
                Box::new(WorkflowEffect::new(host.clone(), plugin.clone(), effect.name.clone())),
                effect.critical,
            )?;
        }
    }
    Ok(())
}

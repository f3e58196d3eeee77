//! Conductor: the top-level façade over the orchestration engine.
//!
//! A conductor instance resolves the active task from the caller's working
//! directory, acquires the per-task lock, drives the state machine, records
//! checkpoints and session history, and releases the lock on every exit path
//! through the scoped [`TaskLock`] guard.
//!
//! Read-only queries (`status`, `list`) skip the lock and tolerate a
//! concurrently-mutating writer by retrying once on a torn read.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::agent::{Agent, AgentContext, AgentError, CliAgent, PluginAgent};
use crate::checkpoint::{Ledger, LedgerError};
use crate::config::{Config, ConfigError};
use crate::engine::{
    Effect, EffectContext, EffectError, EngineError, GraphError, Machine, PhaseGraph, ReviewPassed,
    SpecExists, TransitionOutcome,
};
use crate::lock::{LockError, LockManager};
use crate::plugin::{
    apply_workflow_contributions, discover, global_plugins_dir, PluginHost, PluginStatus,
};
use crate::provider::{
    parse_work_ref, LocalProvider, PluginProvider, Provider, ProviderError, WorkUnit,
};
use crate::task::{Phase, SessionRecord, StoreError, Task, TaskSource, TaskStore};
use crate::vcs::{GitVcs, Vcs, VcsError};
use crate::worktree::{RegistryError, WorktreeRegistry};
use crate::workspace::{Workspace, WorkspaceError};

/// Error type for conductor operations.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    #[error("no active task: run from a task worktree, set an active task, or pass --task")]
    NoActiveTask,

    #[error("quality gate still failing after {attempts} attempts; task parked in implementing")]
    QualityRetriesExhausted { task_id: Uuid, attempts: u32 },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Vcs(#[from] VcsError),
}

/// Read-only view of a task, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: Uuid,
    pub phase: String,
    pub provider: String,
    pub key: String,
    pub title: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<PathBuf>,
    pub specifications: u32,
    pub reviews: u32,
    pub checkpoints: usize,
    pub checkpoint_cursor: usize,
    pub quality_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
}

/// Top-level façade over the orchestration engine.
pub struct Conductor {
    workspace: Workspace,
    config: Config,
    store: TaskStore,
    locks: LockManager,
    worktrees: WorktreeRegistry,
    plugins: Arc<PluginHost>,
    machine: Machine,
    agent: Arc<dyn Agent>,
    vcs: Option<Arc<dyn Vcs>>,
    lock_timeout: Duration,
}

impl Conductor {
    /// Open the workspace containing `cwd` and wire the default
    /// collaborators: plugins from the global and project plugin
    /// directories, the configured agent, and git when `cwd` is inside a
    /// repository.
    pub fn open(cwd: &Path) -> Result<Self, ConductorError> {
        let workspace = Workspace::discover(cwd)?;
        let config = Config::load(&workspace.config_path())?;

        let plugins = Arc::new(PluginHost::new(Duration::from_secs(
            config.plugins.call_timeout_secs,
        )));
        if config.plugins.enabled {
            let global = global_plugins_dir();
            let discovered = discover(global.as_deref(), &workspace.plugins_dir());
            plugins.load(&discovered);
        }

        let agent: Arc<dyn Agent> = match config.agent.plugin {
            Some(ref plugin) if plugins.is_available(plugin) => {
                Arc::new(PluginAgent::new(plugins.clone(), plugin.clone()))
            }
            Some(ref plugin) => {
                tracing::warn!(
                    "configured agent plugin {plugin} is unavailable; falling back to {}",
                    config.agent.command
                );
                Arc::new(CliAgent::new(config.agent.command.clone(), config.agent.args.clone()))
            }
            None => Arc::new(CliAgent::new(config.agent.command.clone(), config.agent.args.clone())),
        };

        let vcs: Option<Arc<dyn Vcs>> = match GitVcs::open(workspace.root()) {
            Ok(git) => Some(Arc::new(git)),
            Err(e) => {
                tracing::debug!("no git repository detected: {e}");
                None
            }
        };

        Self::assemble(workspace, config, agent, vcs, plugins)
    }

    /// Wire a conductor from explicit collaborators (used by tests and by
    /// callers embedding the engine).
    pub fn assemble(
        workspace: Workspace,
        config: Config,
        agent: Arc<dyn Agent>,
        vcs: Option<Arc<dyn Vcs>>,
        plugins: Arc<PluginHost>,
    ) -> Result<Self, ConductorError> {
        let store = TaskStore::new(workspace.work_dir());
        let locks = LockManager::new(workspace.locks_dir());
        let worktrees = WorktreeRegistry::new(&workspace);

        let mut graph = PhaseGraph::standard();
        graph.add_guard(&Phase::implementing(), Box::new(SpecExists))?;
        graph.add_guard(&Phase::reviewing(), Box::new(SpecExists))?;
        graph.add_guard(&Phase::done(), Box::new(ReviewPassed))?;

        graph.add_effect(
            &Phase::planning(),
            Box::new(PlanEffect { agent: agent.clone() }),
            true,
        )?;
        graph.add_effect(
            &Phase::reviewing(),
            Box::new(ReviewEffect { agent: agent.clone() }),
            true,
        )?;
        if let Some(ref vcs) = vcs {
            graph.add_effect(&Phase::done(), Box::new(MergeEffect { vcs: vcs.clone() }), true)?;
            graph.add_effect(
                &Phase::done(),
                Box::new(PullRequestEffect { vcs: vcs.clone() }),
                false,
            )?;
        }
        graph.add_effect(
            &Phase::done(),
            Box::new(ProviderStatusEffect { plugins: plugins.clone(), status: "done" }),
            false,
        )?;
        graph.add_effect(
            &Phase::abandoned(),
            Box::new(ProviderStatusEffect { plugins: plugins.clone(), status: "abandoned" }),
            false,
        )?;

        // Workflow plugin contributions are merged exactly once, here; the
        // machine constructor re-validates the composed graph.
        apply_workflow_contributions(&mut graph, &plugins)?;
        let machine = Machine::new(graph)?;

        let lock_timeout = Duration::from_secs(config.general.lock_timeout_secs);
        Ok(Self {
            workspace,
            config,
            store,
            locks,
            worktrees,
            plugins,
            machine,
            agent,
            vcs,
            lock_timeout,
        })
    }

    /// Override the lock wait (CLI `--timeout`).
    pub fn set_lock_timeout(&mut self, timeout: Duration) {
        self.lock_timeout = timeout;
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Resolve the task to operate on: an explicit id wins, then the
    /// worktree registry, then the global active-task pointer.
    pub fn resolve_task(&self, cwd: &Path, explicit: Option<Uuid>) -> Result<Uuid, ConductorError> {
        if let Some(id) = explicit {
            return Ok(id);
        }
        self.worktrees.resolve(cwd)?.ok_or(ConductorError::NoActiveTask)
    }

    // ------------------------------------------------------------------
    // Task lifecycle operations
    // ------------------------------------------------------------------

    /// Create a task from a work-unit reference: fetch it from its provider,
    /// create the branch (and worktree, when enabled), and record the
    /// initial checkpoint.
    pub fn start(&self, reference: &str) -> Result<Task, ConductorError> {
        let parsed = parse_work_ref(reference)?;
        let provider_name = parsed
            .provider
            .or_else(|| self.config.general.default_provider.clone())
            .unwrap_or_else(|| "local".to_string());

        let provider = self.provider(&provider_name)?;
        let unit: WorkUnit = provider.fetch(&parsed.key)?;

        let branch = format!(
            "{}{}",
            self.config.worktree.branch_prefix,
            sanitize_branch_component(&unit.key)
        );
        let mut task = Task::new(
            TaskSource { provider: provider_name, key: unit.key, title: unit.title },
            branch.clone(),
        );

        let _lock = self.locks.acquire(task.id, self.lock_timeout)?;

        if let Some(ref vcs) = self.vcs {
            if self.config.worktree.enabled {
                let path = self
                    .workspace
                    .root()
                    .join(&self.config.worktree.base_dir)
                    .join(sanitize_branch_component(&task.source.key));
                vcs.create_worktree(&path, &branch)?;
                self.worktrees.register(&path, task.id, &branch)?;
                task.worktree = Some(path);
            } else {
                vcs.create_branch(&branch)?;
            }
        }

        self.store.save(&task)?;
        self.worktrees.set_active_task(task.id)?;

        let mut ledger = Ledger::open(&self.store.task_dir(task.id))?;
        ledger.checkpoint(&task, "task created")?;
        self.record_session(&task, "start", &task.phase.clone(), "task created", &[])?;

        tracing::info!("started task {} ({})", task.short_id(), task.source.title);
        Ok(task)
    }

    /// Transition a task into planning; the plan effect drafts the first
    /// specification.
    pub fn plan(&self, task_id: Uuid) -> Result<TransitionOutcome, ConductorError> {
        self.advance(task_id, &Phase::planning(), "plan")
    }

    /// Transition a task into implementing, then run the quality-retry
    /// loop: implement, check, feed failures back, up to the configured
    /// retry budget. Exhausting the budget parks the task in implementing.
    pub fn implement(&self, task_id: Uuid) -> Result<TransitionOutcome, ConductorError> {
        let outcome = self.advance(task_id, &Phase::implementing(), "implement")?;
        self.run_quality_loop(task_id)?;
        Ok(outcome)
    }

    /// Transition a task into reviewing; the review effect records a
    /// verdict.
    pub fn review(&self, task_id: Uuid) -> Result<TransitionOutcome, ConductorError> {
        self.advance(task_id, &Phase::reviewing(), "review")
    }

    /// Transition a task to done: merge, open a pull request, update the
    /// provider, and release the worktree mapping.
    pub fn finish(&self, task_id: Uuid) -> Result<TransitionOutcome, ConductorError> {
        let outcome = self.advance(task_id, &Phase::done(), "finish")?;
        self.release_worktree(task_id);
        Ok(outcome)
    }

    /// Abandon a task from any non-terminal phase.
    pub fn abandon(&self, task_id: Uuid) -> Result<TransitionOutcome, ConductorError> {
        let outcome = self.advance(task_id, &Phase::abandoned(), "abandon")?;
        self.release_worktree(task_id);
        Ok(outcome)
    }

    /// Drive one state machine transition under the task lock, appending a
    /// checkpoint and a session record on success.
    pub fn advance(
        &self,
        task_id: Uuid,
        target: &Phase,
        operation: &str,
    ) -> Result<TransitionOutcome, ConductorError> {
        let _lock = self.locks.acquire(task_id, self.lock_timeout)?;
        let task = self.store.load(task_id)?;

        let (next, outcome) = self.machine.request(&task, target, &self.store)?;
        self.store.save(&next)?;

        let mut ledger = Ledger::open(&self.store.task_dir(task_id))?;
        ledger.checkpoint(&next, &outcome.label)?;
        self.record_session(&next, operation, &outcome.from, "transition committed", &outcome.warnings)?;

        for warning in &outcome.warnings {
            tracing::warn!("{operation}: non-critical effect failed: {warning}");
        }
        Ok(outcome)
    }

    /// Restore the previous checkpoint.
    pub fn undo(&self, task_id: Uuid) -> Result<Task, ConductorError> {
        let _lock = self.locks.acquire(task_id, self.lock_timeout)?;
        let mut ledger = Ledger::open(&self.store.task_dir(task_id))?;
        let entry = ledger.undo()?;
        let restored = entry.snapshot.clone();
        let label = entry.label.clone();
        self.store.save(&restored)?;
        self.record_session(&restored, "undo", &restored.phase.clone(), &format!("restored checkpoint {label:?}"), &[])?;
        Ok(restored)
    }

    /// Restore the next checkpoint (after an undo).
    pub fn redo(&self, task_id: Uuid) -> Result<Task, ConductorError> {
        let _lock = self.locks.acquire(task_id, self.lock_timeout)?;
        let mut ledger = Ledger::open(&self.store.task_dir(task_id))?;
        let entry = ledger.redo()?;
        let restored = entry.snapshot.clone();
        let label = entry.label.clone();
        self.store.save(&restored)?;
        self.record_session(&restored, "redo", &restored.phase.clone(), &format!("restored checkpoint {label:?}"), &[])?;
        Ok(restored)
    }

    /// Delete a task: remove its worktree, mapping, artifacts, and lock
    /// file.
    pub fn delete(&self, task_id: Uuid) -> Result<(), ConductorError> {
        {
            let _lock = self.locks.acquire(task_id, self.lock_timeout)?;
            self.release_worktree(task_id);
            self.worktrees.clear_active_task(task_id);
            self.store.delete(task_id)?;
        }
        self.locks.remove(task_id);
        tracing::info!("deleted task {task_id}");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read-only queries (lock-free)
    // ------------------------------------------------------------------

    /// Status of one task. Runs without the lock; a torn read from a
    /// concurrent writer is retried once before giving up.
    pub fn status(&self, task_id: Uuid) -> Result<TaskView, ConductorError> {
        let task = self.load_tolerant(task_id)?;
        let ledger = Ledger::open(&self.store.task_dir(task_id))?;
        Ok(TaskView {
            id: task.id,
            phase: task.phase.to_string(),
            provider: task.source.provider.clone(),
            key: task.source.key.clone(),
            title: task.source.title.clone(),
            branch: task.branch.clone(),
            worktree: task.worktree.clone(),
            specifications: self.store.specification_count(task_id)?,
            reviews: self.store.review_count(task_id)?,
            checkpoints: ledger.len(),
            checkpoint_cursor: ledger.cursor(),
            quality_retries: task.quality_retries,
            locked_by: self.locks.holder(task_id).map(|h| h.display()),
        })
    }

    /// Status of every task in the store, skipping unreadable ones.
    pub fn list(&self) -> Result<Vec<TaskView>, ConductorError> {
        let mut views = Vec::new();
        for id in self.store.list()? {
            match self.status(id) {
                Ok(view) => views.push(view),
                Err(e) => tracing::warn!("skipping unreadable task {id}: {e}"),
            }
        }
        Ok(views)
    }

    /// Status of every loaded plugin.
    pub fn plugins(&self) -> Vec<PluginStatus> {
        self.plugins.statuses()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn load_tolerant(&self, task_id: Uuid) -> Result<Task, ConductorError> {
        match self.store.load(task_id) {
            Err(StoreError::Serde(_)) => {
                // A writer may be mid-rename; accept a possibly-stale
                // snapshot on the second attempt rather than erroring.
                std::thread::sleep(Duration::from_millis(50));
                Ok(self.store.load(task_id)?)
            }
            other => Ok(other?),
        }
    }

    fn provider(&self, name: &str) -> Result<Box<dyn Provider>, ConductorError> {
        if name == "local" {
            return Ok(Box::new(LocalProvider));
        }
        if self.plugins.is_available(name) {
            return Ok(Box::new(PluginProvider::new(self.plugins.clone(), name)));
        }
        Err(ConductorError::Provider(ProviderError::UnknownProvider(name.to_string())))
    }

    /// The bounded quality-retry sub-loop inside `implementing`.
    ///
    /// Each attempt invokes the agent with the accumulated feedback, then
    /// evaluates the quality gate (a workflow plugin hook when one is
    /// declared, else the configured check command). A failing gate feeds
    /// its output back and retries; an erroring gate or an exhausted budget
    /// terminates the loop with the task parked in `implementing`.
    fn run_quality_loop(&self, task_id: Uuid) -> Result<(), ConductorError> {
        let _lock = self.locks.acquire(task_id, self.lock_timeout)?;
        let mut task = self.store.load(task_id)?;
        let max_retries = self.config.quality.max_retries;

        loop {
            let context = AgentContext::for_task(&task);
            let output = self.agent.invoke(&prompts::implement(&task), &context)?;
            tracing::debug!("agent produced {} bytes of implementation output", output.len());

            match self.quality_gate(&task)? {
                None => return Ok(()),
                Some(failure) => {
                    task.quality_retries += 1;
                    task.feedback.push(failure.clone());
                    task.updated_at = Utc::now();
                    self.store.save(&task)?;

                    if task.quality_retries >= max_retries {
                        tracing::error!(
                            "quality gate failed {} times for task {}; parking in implementing",
                            task.quality_retries,
                            task.short_id()
                        );
                        return Err(ConductorError::QualityRetriesExhausted {
                            task_id,
                            attempts: task.quality_retries,
                        });
                    }
                    tracing::warn!(
                        "quality gate failed (attempt {}/{}): {}",
                        task.quality_retries,
                        max_retries,
                        failure
                    );
                }
            }
        }
    }

    /// Evaluate the quality gate. `Ok(None)` is a pass, `Ok(Some(reason))`
    /// a clean failure worth retrying; a hook error propagates and
    /// terminates the retry loop.
    fn quality_gate(&self, task: &Task) -> Result<Option<String>, ConductorError> {
        // A declared workflow plugin hook wins over the local check command.
        let hook = self
            .plugins
            .workflow_capabilities()
            .into_iter()
            .find_map(|(plugin, caps)| caps.quality.map(|hook| (plugin, hook)));

        if let Some((plugin, hook)) = hook {
            let value = self
                .plugins
                .call(&plugin, "workflow.guard", serde_json::json!({ "guard": hook, "task": task }))
                .map_err(|e| ConductorError::Engine(EngineError::CriticalEffectFailed {
                    effect: hook.clone(),
                    message: e.to_string(),
                }))?;
            let result: crate::plugin::protocol::GuardCheckResult = serde_json::from_value(value)
                .map_err(|e| ConductorError::Engine(EngineError::CriticalEffectFailed {
                    effect: hook.clone(),
                    message: format!("invalid guard result: {e}"),
                }))?;
            if result.pass {
                return Ok(None);
            }
            return Ok(Some(result.reason.unwrap_or_else(|| format!("{hook} failed"))));
        }

        if let Some(ref command) = self.config.quality.check_command {
            let dir = task
                .worktree
                .clone()
                .unwrap_or_else(|| self.workspace.root().to_path_buf());
            let output = std::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(dir)
                .output()
                .map_err(|e| ConductorError::Engine(EngineError::CriticalEffectFailed {
                    effect: "quality-check".to_string(),
                    message: e.to_string(),
                }))?;
            if output.status.success() {
                return Ok(None);
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Ok(Some(tail(&format!("{stdout}\n{stderr}"), 2000)));
        }

        Ok(None)
    }

    fn release_worktree(&self, task_id: Uuid) {
        match self.worktrees.unregister(task_id) {
            Ok(Some(mapping)) => {
                if let Some(ref vcs) = self.vcs {
                    if let Err(e) = vcs.remove_worktree(&mapping.directory) {
                        tracing::warn!("failed to remove worktree {}: {e}", mapping.directory.display());
                    }
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("failed to unregister worktree for {task_id}: {e}"),
        }
        self.worktrees.clear_active_task(task_id);
    }

    fn record_session(
        &self,
        task: &Task,
        operation: &str,
        from: &Phase,
        outcome: &str,
        warnings: &[String],
    ) -> Result<(), ConductorError> {
        self.store.add_session(
            task.id,
            &SessionRecord {
                timestamp: Utc::now(),
                operation: operation.to_string(),
                from_phase: from.clone(),
                to_phase: task.phase.clone(),
                outcome: outcome.to_string(),
                warnings: warnings.to_vec(),
            },
        )?;
        Ok(())
    }
}

fn sanitize_branch_component(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '-' })
        .collect();
    cleaned.trim_matches('-').to_string()
}

fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let start = trimmed.len() - max;
    // Avoid splitting inside a UTF-8 sequence.
    let start = (start..trimmed.len()).find(|i| trimmed.is_char_boundary(*i)).unwrap_or(start);
    trimmed[start..].to_string()
}

// ----------------------------------------------------------------------
// Built-in transition effects
// ----------------------------------------------------------------------

/// Drafts a specification when entering `planning` (critical).
struct PlanEffect {
    agent: Arc<dyn Agent>,
}

impl Effect for PlanEffect {
    fn name(&self) -> &str {
        "draft-specification"
    }

    fn run(&self, ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
        let context = AgentContext::for_task(ctx.task);
        let output = self
            .agent
            .invoke(&prompts::plan(ctx.task), &context)
            .map_err(|e| EffectError::new(e.to_string()))?;
        let n = ctx
            .store
            .add_specification(ctx.task.id, &output)
            .map_err(|e| EffectError::new(e.to_string()))?;
        tracing::info!("recorded specification-{n} for task {}", ctx.task.short_id());
        Ok(())
    }
}

/// Runs an agent review and records the verdict when entering `reviewing`
/// (critical).
struct ReviewEffect {
    agent: Arc<dyn Agent>,
}

impl Effect for ReviewEffect {
    fn name(&self) -> &str {
        "record-review"
    }

    fn run(&self, ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
        let context = AgentContext::for_task(ctx.task);
        let output = self
            .agent
            .invoke(&prompts::review(ctx.task), &context)
            .map_err(|e| EffectError::new(e.to_string()))?;

        // The verdict must be the first line; normalize anything else to a
        // failing review so an unparseable verdict cannot pass the gate.
        let first = output.lines().next().unwrap_or_default().trim().to_uppercase();
        let review = if first == "PASS" || first == "FAIL" {
            output
        } else {
            format!("FAIL\n{output}")
        };

        let n = ctx
            .store
            .add_review(ctx.task.id, &review)
            .map_err(|e| EffectError::new(e.to_string()))?;
        tracing::info!("recorded review-{n} for task {}", ctx.task.short_id());
        Ok(())
    }
}

/// Merges the task branch when entering `done` (critical).
struct MergeEffect {
    vcs: Arc<dyn Vcs>,
}

impl Effect for MergeEffect {
    fn name(&self) -> &str {
        "merge-branch"
    }

    fn run(&self, ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
        self.vcs.merge(&ctx.task.branch).map_err(|e| EffectError::new(e.to_string()))
    }
}

/// Opens a pull request when entering `done` (non-critical).
struct PullRequestEffect {
    vcs: Arc<dyn Vcs>,
}

impl Effect for PullRequestEffect {
    fn name(&self) -> &str {
        "open-pull-request"
    }

    fn run(&self, ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
        let body = format!("Closes {}:{}", ctx.task.source.provider, ctx.task.source.key);
        let url = self
            .vcs
            .create_pull_request(&ctx.task.source.title, &body, &ctx.task.branch)
            .map_err(|e| EffectError::new(e.to_string()))?;
        tracing::info!("opened pull request {url}");
        Ok(())
    }
}

/// Pushes a status change back to the task's provider (non-critical).
struct ProviderStatusEffect {
    plugins: Arc<PluginHost>,
    status: &'static str,
}

impl Effect for ProviderStatusEffect {
    fn name(&self) -> &str {
        "update-provider-status"
    }

    fn run(&self, ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
        let provider_name = ctx.task.source.provider.clone();
        if provider_name == "local" {
            return Ok(());
        }
        if !self.plugins.is_available(&provider_name) {
            return Err(EffectError::new(format!("provider plugin {provider_name} unavailable")));
        }
        PluginProvider::new(self.plugins.clone(), provider_name)
            .update_status(&ctx.task.source.key, self.status)
            .map_err(|e| EffectError::new(e.to_string()))
    }
}

mod prompts {
    //! Prompt templates for the built-in phase effects.

    use crate::task::Task;

    pub fn plan(task: &Task) -> String {
        format!(
            "You are planning the development task \"{}\" ({}:{}).\n\
             Produce a numbered implementation specification in markdown:\n\
             goals, constraints, step-by-step changes, and a test plan.",
            task.source.title, task.source.provider, task.source.key
        )
    }

    pub fn implement(task: &Task) -> String {
        let mut prompt = format!(
            "Implement the task \"{}\" on branch {} following the recorded \
             specifications.",
            task.source.title, task.branch
        );
        if !task.feedback.is_empty() {
            prompt.push_str("\n\nPrevious attempts failed the quality gate:\n");
            for (i, item) in task.feedback.iter().enumerate() {
                prompt.push_str(&format!("\n--- attempt {} ---\n{item}\n", i + 1));
            }
            prompt.push_str("\nAddress these failures.");
        }
        prompt
    }

    pub fn review(task: &Task) -> String {
        format!(
            "Review the implementation of \"{}\" on branch {} against its \
             specifications. Answer PASS or FAIL on the first line, then \
             explain your verdict.",
            task.source.title, task.branch
        )
    }
}

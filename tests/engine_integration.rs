//! End-to-end engine scenarios through the public conductor API.

use std::sync::Arc;
use std::time::Duration;

use mehrhof::{
    Agent, AgentContext, AgentError, Conductor, ConductorError, Config, EngineError, Phase,
    PluginHost, Workspace,
};

/// Deterministic agent: plans produce a spec document, reviews pass.
struct StubAgent;

impl Agent for StubAgent {
    fn invoke(&self, prompt: &str, context: &AgentContext) -> Result<String, AgentError> {
        if prompt.contains("Review the implementation") {
            return Ok("PASS\nimplementation matches the specification".to_string());
        }
        if prompt.contains("planning") {
            return Ok(format!("# Specification for {}\n\n1. Change the code.", context.title));
        }
        Ok("implemented".to_string())
    }
}

fn conductor(temp: &tempfile::TempDir) -> Conductor {
    let workspace = Workspace::init(temp.path()).unwrap();
    let mut config = Config::default();
    config.worktree.enabled = false;
    config.plugins.enabled = false;
    let plugins = Arc::new(PluginHost::new(Duration::from_secs(1)));
    Conductor::assemble(workspace, config, Arc::new(StubAgent), None, plugins).unwrap()
}

#[test]
fn transition_to_reviewing_blocked_until_specification_exists() {
    let temp = tempfile::tempdir().unwrap();
    let conductor = conductor(&temp);

    // Task in `implementing` with zero specifications.
    let task = conductor.start("t1").unwrap();
    let mut raw = conductor.store().load(task.id).unwrap();
    raw.phase = Phase::implementing();
    conductor.store().save(&raw).unwrap();
    let checkpoints_before = conductor.status(task.id).unwrap().checkpoints;

    // The transition request is rejected and the stored phase is unchanged.
    match conductor.review(task.id) {
        Err(ConductorError::Engine(EngineError::GuardRejected { reason, .. })) => {
            assert_eq!(reason, "no specifications");
        }
        other => panic!("expected GuardRejected, got {other:?}"),
    }
    assert_eq!(conductor.store().load(task.id).unwrap().phase, Phase::implementing());

    // After one specification is added the same request succeeds, the phase
    // becomes `reviewing`, and a new checkpoint is appended.
    conductor.store().add_specification(task.id, "# Spec\n\n1. Do it.").unwrap();
    conductor.review(task.id).unwrap();

    let view = conductor.status(task.id).unwrap();
    assert_eq!(view.phase, "reviewing");
    assert_eq!(view.checkpoints, checkpoints_before + 1);
}

#[test]
fn full_lifecycle_reaches_done() {
    let temp = tempfile::tempdir().unwrap();
    let conductor = conductor(&temp);

    let task = conductor.start("feature").unwrap();
    conductor.plan(task.id).unwrap();
    conductor.implement(task.id).unwrap();
    conductor.review(task.id).unwrap();
    conductor.finish(task.id).unwrap();

    let view = conductor.status(task.id).unwrap();
    assert_eq!(view.phase, "done");
    assert_eq!(view.specifications, 1);
    assert_eq!(view.reviews, 1);

    // Terminal phase: nothing further is legal.
    assert!(matches!(
        conductor.abandon(task.id),
        Err(ConductorError::Engine(EngineError::GuardRejected { .. }))
    ));
}

#[test]
fn undo_redo_and_truncation_across_operations() {
    let temp = tempfile::tempdir().unwrap();
    let conductor = conductor(&temp);

    let task = conductor.start("history").unwrap();
    conductor.plan(task.id).unwrap();
    conductor.implement(task.id).unwrap();

    // Undo twice: implementing -> planning -> idle.
    assert_eq!(conductor.undo(task.id).unwrap().phase, Phase::planning());
    assert_eq!(conductor.undo(task.id).unwrap().phase, Phase::idle());

    // Redo restores the exact pre-undo snapshot.
    assert_eq!(conductor.redo(task.id).unwrap().phase, Phase::planning());

    // A new transition discards the remaining redo entry.
    conductor.implement(task.id).unwrap();
    assert!(matches!(
        conductor.redo(task.id),
        Err(ConductorError::Ledger(mehrhof::LedgerError::NoCheckpoint))
    ));
}

#[test]
fn skipping_phases_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let conductor = conductor(&temp);
    let task = conductor.start("hasty").unwrap();

    // idle -> implementing skips planning.
    assert!(matches!(
        conductor.implement(task.id),
        Err(ConductorError::Engine(EngineError::GuardRejected { .. }))
    ));
    // idle -> done skips everything.
    assert!(matches!(
        conductor.finish(task.id),
        Err(ConductorError::Engine(EngineError::GuardRejected { .. }))
    ));
    assert_eq!(conductor.store().load(task.id).unwrap().phase, Phase::idle());
}

#[cfg(unix)]
mod with_git {
    use super::*;
    use std::path::Path;
    use std::process::Command;

    use mehrhof::{GitVcs, Vcs};

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "init"]);
    }

    #[test]
    fn start_with_worktree_isolation_registers_mapping() {
        let temp = tempfile::tempdir().unwrap();
        init_repo(temp.path());

        let workspace = Workspace::init(temp.path()).unwrap();
        let mut config = Config::default();
        config.plugins.enabled = false;
        let plugins = Arc::new(PluginHost::new(Duration::from_secs(1)));
        let vcs: Arc<dyn Vcs> = Arc::new(GitVcs::open(temp.path()).unwrap());
        let conductor =
            Conductor::assemble(workspace, config, Arc::new(StubAgent), Some(vcs), plugins)
                .unwrap();

        let task = conductor.start("isolated").unwrap();
        let worktree = task.worktree.clone().expect("worktree created");
        assert!(worktree.join("README.md").exists());

        // Resolution from inside the worktree finds this task.
        let resolved = conductor.resolve_task(&worktree, None).unwrap();
        assert_eq!(resolved, task.id);

        // Abandoning removes the worktree and its mapping.
        conductor.plan(task.id).unwrap();
        conductor.abandon(task.id).unwrap();
        assert!(!worktree.exists());
    }
}

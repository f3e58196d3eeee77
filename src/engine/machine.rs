//! Transition evaluation.

use crate::task::{Phase, Task, TaskStore};

use super::effect::EffectContext;
use super::graph::PhaseGraph;
use super::EngineError;

/// Result of an accepted transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// Phase before the transition
    pub from: Phase,
    /// Phase after the transition
    pub to: Phase,
    /// Checkpoint label for the transition
    pub label: String,
    /// Non-critical effect failures (logged, transition committed anyway)
    pub warnings: Vec<String>,
}

/// The task state machine.
///
/// Owns the composed phase graph and evaluates transition requests against
/// it. The machine never persists anything itself: it returns the mutated
/// working copy of the task and leaves the commit to the caller, so a
/// rejected or rolled-back transition leaves the task store untouched.
pub struct Machine {
    graph: PhaseGraph,
}

impl Machine {
    /// Build a machine over a validated phase graph.
    pub fn new(graph: PhaseGraph) -> Result<Self, EngineError> {
        graph.validate()?;
        Ok(Self { graph })
    }

    /// The composed phase graph.
    pub fn graph(&self) -> &PhaseGraph {
        &self.graph
    }

    /// Request a transition of `task` to `target`.
    ///
    /// On acceptance, returns the mutated task copy (phase updated, effect
    /// mutations applied) and the transition outcome; the caller persists
    /// the copy and appends a checkpoint. On rejection or critical effect
    /// failure the original task is untouched.
    pub fn request(
        &self,
        task: &Task,
        target: &Phase,
        store: &TaskStore,
    ) -> Result<(Task, TransitionOutcome), EngineError> {
        let def = self
            .graph
            .get(target)
            .ok_or_else(|| EngineError::UnknownPhase(target.clone()))?;

        if !def.predecessors.contains(&task.phase) {
            return Err(EngineError::GuardRejected {
                guard: "phase-graph".to_string(),
                reason: format!("{} does not precede {}", task.phase, target),
            });
        }

        for guard in &def.guards {
            if let Err(reason) = guard.check(task, store) {
                tracing::debug!(
                    "transition {} -> {} rejected by {}: {}",
                    task.phase,
                    target,
                    guard.name(),
                    reason
                );
                return Err(EngineError::GuardRejected { guard: guard.name().to_string(), reason });
            }
        }

        let mut next = task.clone();
        let mut warnings = Vec::new();

        for entry in &def.effects {
            let mut ctx = EffectContext { task: &mut next, store };
            match entry.effect.run(&mut ctx) {
                Ok(()) => {}
                Err(e) if entry.critical => {
                    tracing::error!(
                        "critical effect {} failed during {} -> {}: {}",
                        entry.effect.name(),
                        task.phase,
                        target,
                        e
                    );
                    return Err(EngineError::CriticalEffectFailed {
                        effect: entry.effect.name().to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "non-critical effect {} failed during {} -> {}: {}",
                        entry.effect.name(),
                        task.phase,
                        target,
                        e
                    );
                    warnings.push(format!("{}: {}", entry.effect.name(), e));
                }
            }
        }

        let from = next.phase.clone();
        next.phase = target.clone();
        next.updated_at = chrono::Utc::now();

        let outcome = TransitionOutcome {
            label: format!("{from} -> {target}"),
            from,
            to: target.clone(),
            warnings,
        };
        Ok((next, outcome))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::engine::{Effect, EffectError, Guard, SpecExists};
    use crate::task::TaskSource;
    use tempfile::tempdir;

    struct CountingEffect {
        calls: Arc<AtomicU32>,
    }

    impl Effect for CountingEffect {
        fn name(&self) -> &str {
            "counting"
        }

        fn run(&self, _ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingEffect;

    impl Effect for FailingEffect {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(&self, _ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
            Err(EffectError::new("boom"))
        }
    }

    struct RejectingGuard;

    impl Guard for RejectingGuard {
        fn name(&self) -> &str {
            "always-no"
        }

        fn check(&self, _task: &Task, _store: &TaskStore) -> Result<(), String> {
            Err("computer says no".to_string())
        }
    }

    fn setup() -> (tempfile::TempDir, TaskStore, Task) {
        let temp = tempdir().unwrap();
        let store = TaskStore::new(temp.path().join("work"));
        let task = Task::new(
            TaskSource {
                provider: "local".to_string(),
                key: "demo".to_string(),
                title: "Demo".to_string(),
            },
            "task/demo".to_string(),
        );
        store.save(&task).unwrap();
        (temp, store, task)
    }

    #[test]
    fn test_legal_transition_yields_declared_next_phase() {
        let (_temp, store, task) = setup();
        let machine = Machine::new(PhaseGraph::standard()).unwrap();

        let (next, outcome) = machine.request(&task, &Phase::planning(), &store).unwrap();
        assert_eq!(next.phase, Phase::planning());
        assert_eq!(outcome.from, Phase::idle());
        assert_eq!(outcome.to, Phase::planning());
        assert_eq!(outcome.label, "idle -> planning");
    }

    #[test]
    fn test_illegal_transition_rejected_and_task_unchanged() {
        let (_temp, store, task) = setup();
        let machine = Machine::new(PhaseGraph::standard()).unwrap();

        let err = machine.request(&task, &Phase::reviewing(), &store).unwrap_err();
        assert!(matches!(err, EngineError::GuardRejected { .. }));

        // The persisted record is untouched.
        let reloaded = store.load(task.id).unwrap();
        assert_eq!(reloaded.phase, Phase::idle());
    }

    #[test]
    fn test_every_legal_pair_and_every_illegal_pair() {
        let (_temp, store, mut task) = setup();
        let machine = Machine::new(PhaseGraph::standard()).unwrap();
        let phases: Vec<Phase> = machine.graph().phases().cloned().collect();

        for from in &phases {
            for to in &phases {
                task.phase = from.clone();
                let result = machine.request(&task, to, &store);
                if machine.graph().allows(from, to) {
                    assert_eq!(result.unwrap().0.phase, *to, "{from} -> {to}");
                } else {
                    assert!(
                        matches!(result, Err(EngineError::GuardRejected { .. })),
                        "{from} -> {to} should be rejected"
                    );
                }
            }
        }
    }

    #[test]
    fn test_guard_rejection_carries_reason() {
        let (_temp, store, task) = setup();
        let mut graph = PhaseGraph::standard();
        graph.add_guard(&Phase::planning(), Box::new(RejectingGuard)).unwrap();
        let machine = Machine::new(graph).unwrap();

        match machine.request(&task, &Phase::planning(), &store) {
            Err(EngineError::GuardRejected { guard, reason }) => {
                assert_eq!(guard, "always-no");
                assert_eq!(reason, "computer says no");
            }
            other => panic!("expected GuardRejected, got {other:?}"),
        }
    }

    #[test]
    fn test_spec_guard_blocks_review_until_spec_added() {
        let (_temp, store, mut task) = setup();
        let mut graph = PhaseGraph::standard();
        graph.add_guard(&Phase::reviewing(), Box::new(SpecExists)).unwrap();
        let machine = Machine::new(graph).unwrap();

        task.phase = Phase::implementing();
        match machine.request(&task, &Phase::reviewing(), &store) {
            Err(EngineError::GuardRejected { reason, .. }) => {
                assert_eq!(reason, "no specifications");
            }
            other => panic!("expected GuardRejected, got {other:?}"),
        }

        store.add_specification(task.id, "# Plan").unwrap();
        let (next, _) = machine.request(&task, &Phase::reviewing(), &store).unwrap();
        assert_eq!(next.phase, Phase::reviewing());
    }

    #[test]
    fn test_critical_effect_failure_rolls_back() {
        let (_temp, store, task) = setup();
        let mut graph = PhaseGraph::standard();
        graph.add_effect(&Phase::planning(), Box::new(FailingEffect), true).unwrap();
        let machine = Machine::new(graph).unwrap();

        let err = machine.request(&task, &Phase::planning(), &store).unwrap_err();
        match err {
            EngineError::CriticalEffectFailed { effect, message } => {
                assert_eq!(effect, "failing");
                assert_eq!(message, "boom");
            }
            other => panic!("expected CriticalEffectFailed, got {other:?}"),
        }
        assert_eq!(store.load(task.id).unwrap().phase, Phase::idle());
    }

    #[test]
    fn test_non_critical_effect_failure_commits_with_warning() {
        let (_temp, store, task) = setup();
        let calls = Arc::new(AtomicU32::new(0));
        let mut graph = PhaseGraph::standard();
        graph.add_effect(&Phase::planning(), Box::new(FailingEffect), false).unwrap();
        graph
            .add_effect(&Phase::planning(), Box::new(CountingEffect { calls: calls.clone() }), true)
            .unwrap();
        let machine = Machine::new(graph).unwrap();

        let (next, outcome) = machine.request(&task, &Phase::planning(), &store).unwrap();
        assert_eq!(next.phase, Phase::planning());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("failing"));
        // Later effects still ran.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_effects_run_in_declaration_order() {
        let (_temp, store, task) = setup();

        struct OrderEffect {
            tag: &'static str,
            log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
        }
        impl Effect for OrderEffect {
            fn name(&self) -> &str {
                self.tag
            }
            fn run(&self, _ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
                self.log.lock().push(self.tag);
                Ok(())
            }
        }

        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut graph = PhaseGraph::standard();
        for tag in ["first", "second", "third"] {
            graph
                .add_effect(
                    &Phase::planning(),
                    Box::new(OrderEffect { tag, log: log.clone() }),
                    false,
                )
                .unwrap();
        }
        let machine = Machine::new(graph).unwrap();

        machine.request(&task, &Phase::planning(), &store).unwrap();
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }
}

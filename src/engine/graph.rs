//! The composed phase graph.
//!
//! Phases form a directed acyclic graph rooted at `idle`. Each phase lists
//! its allowed predecessors; guards and effects attach to the transition
//! into a phase. Abort phases (`abandoned`) accept every non-terminal phase
//! as a predecessor and are kept up to date as plugins splice new phases in.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::task::Phase;

use super::effect::Effect;
use super::guard::Guard;

/// Error type for graph composition and validation.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("phase {0} is already defined")]
    DuplicatePhase(Phase),

    #[error("insertion anchor {0} does not exist")]
    UnknownAnchor(Phase),

    #[error("phase {0} references undefined predecessor {1}")]
    UndefinedPredecessor(Phase, Phase),

    #[error("phase graph contains a cycle through {0}")]
    Cycle(Phase),

    #[error("phase {0} is unreachable from the initial phase")]
    Unreachable(Phase),

    #[error("non-terminal phase {0} has no successor")]
    DeadEnd(Phase),

    #[error("terminal phase {0} has a successor")]
    TerminalSuccessor(Phase),

    #[error("phase graph has no terminal phase")]
    NoTerminal,
}

/// An effect attached to a transition, with its criticality.
pub struct EffectEntry {
    pub effect: Box<dyn Effect>,
    pub critical: bool,
}

/// Definition of one phase: its predecessors, guards, and effects.
pub struct PhaseDef {
    /// Phase name
    pub name: Phase,
    /// Phases that may legally precede this one
    pub predecessors: Vec<Phase>,
    /// Whether the phase ends the task's lifecycle
    pub terminal: bool,
    /// Whether the phase accepts every non-terminal phase as predecessor
    /// (abort semantics)
    pub abort: bool,
    /// Guards evaluated, in order, before the transition into this phase
    pub guards: Vec<Box<dyn Guard>>,
    /// Effects run, in order, during the transition into this phase
    pub effects: Vec<EffectEntry>,
}

impl PhaseDef {
    fn new(name: Phase, predecessors: Vec<Phase>) -> Self {
        Self { name, predecessors, terminal: false, abort: false, guards: Vec::new(), effects: Vec::new() }
    }
}

/// Where a plugin-contributed phase is spliced into the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhasePosition {
    /// Insert the new phase between the anchor's predecessors and the anchor
    Before(Phase),
    /// Insert the new phase between the anchor and its successors
    After(Phase),
}

/// A plugin-declared phase insertion.
#[derive(Debug, Clone)]
pub struct PhaseInsertion {
    pub name: Phase,
    pub position: PhasePosition,
}

/// The composed phase graph.
pub struct PhaseGraph {
    initial: Phase,
    defs: Vec<PhaseDef>,
}

impl PhaseGraph {
    /// The built-in lifecycle: `idle → planning → implementing → reviewing →
    /// done`, with `abandoned` reachable from every non-terminal phase.
    pub fn standard() -> Self {
        let mut done = PhaseDef::new(Phase::done(), vec![Phase::reviewing()]);
        done.terminal = true;

        let mut abandoned = PhaseDef::new(
            Phase::abandoned(),
            vec![Phase::idle(), Phase::planning(), Phase::implementing(), Phase::reviewing()],
        );
        abandoned.terminal = true;
        abandoned.abort = true;

        Self {
            initial: Phase::idle(),
            defs: vec![
                PhaseDef::new(Phase::idle(), Vec::new()),
                PhaseDef::new(Phase::planning(), vec![Phase::idle()]),
                PhaseDef::new(Phase::implementing(), vec![Phase::planning()]),
                PhaseDef::new(Phase::reviewing(), vec![Phase::implementing()]),
                done,
                abandoned,
            ],
        }
    }

    /// The initial phase of the graph.
    pub fn initial(&self) -> &Phase {
        &self.initial
    }

    /// Look up a phase definition.
    pub fn get(&self, phase: &Phase) -> Option<&PhaseDef> {
        self.defs.iter().find(|d| &d.name == phase)
    }

    fn get_mut(&mut self, phase: &Phase) -> Option<&mut PhaseDef> {
        self.defs.iter_mut().find(|d| &d.name == phase)
    }

    /// All phase names, in definition order.
    pub fn phases(&self) -> impl Iterator<Item = &Phase> {
        self.defs.iter().map(|d| &d.name)
    }

    /// Whether `from → to` is an edge of the composed graph.
    pub fn allows(&self, from: &Phase, to: &Phase) -> bool {
        self.get(to).is_some_and(|def| def.predecessors.contains(from))
    }

    /// Whether a phase ends the lifecycle.
    pub fn is_terminal(&self, phase: &Phase) -> bool {
        self.get(phase).is_some_and(|d| d.terminal)
    }

    /// Splice a plugin-contributed phase into the graph.
    ///
    /// `After(x)` routes `x`'s former successors through the new phase;
    /// `Before(x)` routes `x`'s former predecessors through it. Abort phases
    /// keep their existing predecessors and additionally accept the new
    /// phase.
    pub fn insert_phase(&mut self, insertion: &PhaseInsertion) -> Result<(), GraphError> {
        if self.get(&insertion.name).is_some() {
            return Err(GraphError::DuplicatePhase(insertion.name.clone()));
        }
        let anchor = match &insertion.position {
            PhasePosition::Before(a) | PhasePosition::After(a) => a.clone(),
        };
        if self.get(&anchor).is_none() {
            return Err(GraphError::UnknownAnchor(anchor));
        }

        let new = insertion.name.clone();
        match &insertion.position {
            PhasePosition::After(_) => {
                for def in &mut self.defs {
                    if def.abort {
                        continue;
                    }
                    for pred in &mut def.predecessors {
                        if *pred == anchor {
                            *pred = new.clone();
                        }
                    }
                }
                self.defs.push(PhaseDef::new(new.clone(), vec![anchor]));
            }
            PhasePosition::Before(_) => {
                let preds = self
                    .get(&anchor)
                    .map(|d| d.predecessors.clone())
                    .unwrap_or_default();
                if let Some(def) = self.get_mut(&anchor) {
                    def.predecessors = vec![new.clone()];
                }
                self.defs.push(PhaseDef::new(new.clone(), preds));
            }
        }

        // Abort phases accept every non-terminal phase.
        for def in &mut self.defs {
            if def.abort {
                def.predecessors.push(new.clone());
            }
        }

        Ok(())
    }

    /// Attach an extra guard to the transition into `phase`.
    pub fn add_guard(&mut self, phase: &Phase, guard: Box<dyn Guard>) -> Result<(), GraphError> {
        let def = self.get_mut(phase).ok_or_else(|| GraphError::UnknownAnchor(phase.clone()))?;
        def.guards.push(guard);
        Ok(())
    }

    /// Attach an extra effect to the transition into `phase`.
    pub fn add_effect(
        &mut self,
        phase: &Phase,
        effect: Box<dyn Effect>,
        critical: bool,
    ) -> Result<(), GraphError> {
        let def = self.get_mut(phase).ok_or_else(|| GraphError::UnknownAnchor(phase.clone()))?;
        def.effects.push(EffectEntry { effect, critical });
        Ok(())
    }

    /// Validate the composed graph: defined predecessors, acyclic, fully
    /// reachable from the initial phase, and every path ending in exactly
    /// one terminal phase.
    pub fn validate(&self) -> Result<(), GraphError> {
        // Successor adjacency from the predecessor lists.
        let mut successors: HashMap<&Phase, Vec<&Phase>> = HashMap::new();
        for def in &self.defs {
            successors.entry(&def.name).or_default();
            for pred in &def.predecessors {
                if self.get(pred).is_none() {
                    return Err(GraphError::UndefinedPredecessor(def.name.clone(), pred.clone()));
                }
                successors.entry(pred).or_default().push(&def.name);
            }
        }

        if !self.defs.iter().any(|d| d.terminal) {
            return Err(GraphError::NoTerminal);
        }

        for def in &self.defs {
            let succs = successors.get(&def.name).map_or(0, Vec::len);
            if def.terminal && succs > 0 {
                return Err(GraphError::TerminalSuccessor(def.name.clone()));
            }
            if !def.terminal && succs == 0 {
                return Err(GraphError::DeadEnd(def.name.clone()));
            }
        }

        // Cycle detection: Kahn's algorithm over the successor edges.
        let mut indegree: HashMap<&Phase, usize> = HashMap::new();
        for def in &self.defs {
            indegree.insert(&def.name, def.predecessors.len());
        }
        let mut queue: VecDeque<&Phase> =
            indegree.iter().filter(|(_, d)| **d == 0).map(|(p, _)| *p).collect();
        let mut visited = 0usize;
        while let Some(phase) = queue.pop_front() {
            visited += 1;
            if let Some(succs) = successors.get(phase) {
                for succ in succs {
                    if let Some(d) = indegree.get_mut(*succ) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(*succ);
                        }
                    }
                }
            }
        }
        if visited != self.defs.len() {
            let culprit = indegree
                .iter()
                .find(|(_, d)| **d > 0)
                .map(|(p, _)| (*p).clone())
                .unwrap_or_else(Phase::idle);
            return Err(GraphError::Cycle(culprit));
        }

        // Reachability from the initial phase.
        let mut reachable: HashSet<&Phase> = HashSet::new();
        let mut queue: VecDeque<&Phase> = VecDeque::new();
        reachable.insert(&self.initial);
        queue.push_back(&self.initial);
        while let Some(phase) = queue.pop_front() {
            if let Some(succs) = successors.get(phase) {
                for succ in succs {
                    if reachable.insert(*succ) {
                        queue.push_back(*succ);
                    }
                }
            }
        }
        for def in &self.defs {
            if !reachable.contains(&def.name) {
                return Err(GraphError::Unreachable(def.name.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_graph_is_valid() {
        let graph = PhaseGraph::standard();
        graph.validate().unwrap();
    }

    #[test]
    fn test_standard_edges() {
        let graph = PhaseGraph::standard();
        assert!(graph.allows(&Phase::idle(), &Phase::planning()));
        assert!(graph.allows(&Phase::planning(), &Phase::implementing()));
        assert!(graph.allows(&Phase::implementing(), &Phase::reviewing()));
        assert!(graph.allows(&Phase::reviewing(), &Phase::done()));
        assert!(graph.allows(&Phase::implementing(), &Phase::abandoned()));

        assert!(!graph.allows(&Phase::idle(), &Phase::reviewing()));
        assert!(!graph.allows(&Phase::reviewing(), &Phase::implementing()));
        assert!(!graph.allows(&Phase::done(), &Phase::abandoned()));
    }

    #[test]
    fn test_insert_after_splices_successors() {
        let mut graph = PhaseGraph::standard();
        graph
            .insert_phase(&PhaseInsertion {
                name: Phase::new("security-scan"),
                position: PhasePosition::After(Phase::reviewing()),
            })
            .unwrap();
        graph.validate().unwrap();

        assert!(graph.allows(&Phase::reviewing(), &Phase::new("security-scan")));
        assert!(graph.allows(&Phase::new("security-scan"), &Phase::done()));
        assert!(!graph.allows(&Phase::reviewing(), &Phase::done()));
        // The new phase can still be abandoned.
        assert!(graph.allows(&Phase::new("security-scan"), &Phase::abandoned()));
    }

    #[test]
    fn test_insert_before_splices_predecessors() {
        let mut graph = PhaseGraph::standard();
        graph
            .insert_phase(&PhaseInsertion {
                name: Phase::new("triage"),
                position: PhasePosition::Before(Phase::planning()),
            })
            .unwrap();
        graph.validate().unwrap();

        assert!(graph.allows(&Phase::idle(), &Phase::new("triage")));
        assert!(graph.allows(&Phase::new("triage"), &Phase::planning()));
        assert!(!graph.allows(&Phase::idle(), &Phase::planning()));
    }

    #[test]
    fn test_insert_duplicate_rejected() {
        let mut graph = PhaseGraph::standard();
        let err = graph
            .insert_phase(&PhaseInsertion {
                name: Phase::reviewing(),
                position: PhasePosition::After(Phase::planning()),
            })
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicatePhase(_)));
    }

    #[test]
    fn test_insert_unknown_anchor_rejected() {
        let mut graph = PhaseGraph::standard();
        let err = graph
            .insert_phase(&PhaseInsertion {
                name: Phase::new("extra"),
                position: PhasePosition::After(Phase::new("nonexistent")),
            })
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownAnchor(_)));
    }

    #[test]
    fn test_insert_before_initial_is_unreachable() {
        let mut graph = PhaseGraph::standard();
        graph
            .insert_phase(&PhaseInsertion {
                name: Phase::new("pre-idle"),
                position: PhasePosition::Before(Phase::idle()),
            })
            .unwrap();
        assert!(matches!(graph.validate(), Err(GraphError::Unreachable(_))));
    }

    #[test]
    fn test_cyclic_graph_rejected() {
        // Hand-built cycle: planning and implementing precede each other.
        let mut graph = PhaseGraph::standard();
        if let Some(def) = graph.get_mut(&Phase::planning()) {
            def.predecessors.push(Phase::implementing());
        }
        assert!(matches!(graph.validate(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_dead_end_rejected() {
        let mut graph = PhaseGraph::standard();
        // Orphan `done` so reviewing leads nowhere but abandoned... then cut
        // reviewing out of abandoned too, leaving it a dead end.
        if let Some(def) = graph.get_mut(&Phase::done()) {
            def.predecessors.clear();
        }
        if let Some(def) = graph.get_mut(&Phase::abandoned()) {
            def.predecessors.retain(|p| p != &Phase::reviewing());
        }
        assert!(matches!(graph.validate(), Err(GraphError::DeadEnd(_))));
    }
}

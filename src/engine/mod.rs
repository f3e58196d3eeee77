//! Task state machine: phases, guarded transitions, and effects.
//!
//! The engine is the central control-flow component. A transition request
//! names a target phase; it is accepted only if the current phase legally
//! precedes it in the phase graph and every guard attached to the target
//! evaluates true. On acceptance, effects run in declaration order; a
//! critical effect failure rolls the transition back, while non-critical
//! failures are logged and the transition still commits.
//!
//! Workflow plugins may splice additional phases, guards, and effects into
//! the graph at load time; the composed graph must remain acyclic and fully
//! reachable.

mod effect;
mod graph;
mod guard;
mod machine;

pub use effect::{Effect, EffectContext, EffectError};
pub use graph::{GraphError, PhaseDef, PhaseGraph, PhaseInsertion, PhasePosition};
pub use guard::{Guard, ReviewPassed, SpecExists};
pub use machine::{Machine, TransitionOutcome};

use crate::task::Phase;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The transition is not legal: either the phase pair is not an edge of
    /// the composed graph, or a guard rejected it. Recoverable; the caller
    /// fixes the preconditions and retries.
    #[error("transition rejected by {guard}: {reason}")]
    GuardRejected { guard: String, reason: String },

    /// A critical effect failed; the transition was rolled back and the task
    /// store left unchanged.
    #[error("critical effect {effect} failed: {message}")]
    CriticalEffectFailed { effect: String, message: String },

    /// The requested target phase does not exist in the composed graph.
    #[error("unknown phase: {0}")]
    UnknownPhase(Phase),

    /// The composed phase graph is invalid.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

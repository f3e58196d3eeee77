//! Transition effects.
//!
//! Effects run in declaration order once every guard has passed. They mutate
//! a working copy of the task; the store commit happens only after all
//! critical effects succeed, so a critical failure rolls the whole
//! transition back.

use crate::task::{Task, TaskStore};

/// Failure of a single effect.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct EffectError {
    pub message: String,
}

impl EffectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Mutable view an effect operates on.
pub struct EffectContext<'a> {
    /// Working copy of the task; committed only if the transition succeeds
    pub task: &'a mut Task,
    /// The task store, for reading and writing per-task artifacts
    pub store: &'a TaskStore,
}

/// An action executed as part of a transition.
pub trait Effect: Send + Sync {
    /// Effect name, used in logs and error reports.
    fn name(&self) -> &str;

    /// Run the effect.
    fn run(&self, ctx: &mut EffectContext<'_>) -> Result<(), EffectError>;
}

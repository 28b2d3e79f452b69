//! Runtime error types.

use thiserror::Error;

use crate::state::AgentState;

/// Errors surfaced by the agent runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A run was requested while the agent was not idle.
    #[error("agent cannot start a run from state {0}")]
    InvalidState(AgentState),

    /// A step executor failed.
    #[error("step execution failed: {0}")]
    Step(String),
}

/// Convenience result alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

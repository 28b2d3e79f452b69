//! Agent lifecycle states.

use std::fmt;

/// Lifecycle state of an [`Agent`](crate::Agent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentState {
    /// Ready to accept a run.
    #[default]
    Idle,
    /// Currently inside a run loop.
    Running,
    /// A run concluded by an executor signalling completion.
    Finished,
    /// A run aborted on a step failure.
    Error,
}

impl AgentState {
    /// Whether the state marks the end of a run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!AgentState::Idle.is_terminal());
        assert!(!AgentState::Running.is_terminal());
        assert!(AgentState::Finished.is_terminal());
        assert!(AgentState::Error.is_terminal());
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(AgentState::Running.to_string(), "running");
    }
}

//! Error types shared by the foundation crate.

use crate::event::EventStatus;

/// Errors raised by core types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// An event status transition that would move backward or out of
    /// a terminal state.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the event currently holds.
        from: EventStatus,
        /// Status the caller attempted to move to.
        to: EventStatus,
    },
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

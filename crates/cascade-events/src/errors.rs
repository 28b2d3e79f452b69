//! Error taxonomy for the event engine.
//!
//! Propagation policy (see the orchestrator): bus-level outcomes are
//! boolean returns so producers can fire and forget; persistence
//! failures are logged and swallowed; lineage cycles degrade or are
//! reported, never looped on.

/// Errors raised by the event engine.
#[derive(Debug, thiserror::Error)]
pub enum EventsError {
    /// The bus is draining or shut down and rejected the event.
    #[error("bus is draining, event {0} rejected")]
    Admission(String),

    /// A persistence operation failed. Swallowed by the gateway,
    /// surfaced only in logs and store-level results.
    #[error("persistence failure in {store}: {message}")]
    Persistence {
        /// Which store failed.
        store: &'static str,
        /// Failure detail.
        message: String,
    },

    /// A cycle was found in the parent graph.
    #[error("lineage cycle detected at event {0}")]
    LineageCycle(String),

    /// SQLite error from the fallback store.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error from the fallback store.
    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    /// JSON (de)serialization error on a stored column.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Error raised by an [`crate::bus::EventHandler`]. The dispatcher
/// isolates it: a failing handler never aborts its siblings.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Build from anything displayable.
    #[must_use]
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

/// Result alias for event-engine operations.
pub type Result<T> = std::result::Result<T, EventsError>;

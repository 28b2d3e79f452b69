//! # cascade-events
//!
//! The event engine: in-process pub/sub bus, hybrid persistence, and
//! causal-lineage tracking.
//!
//! - **Bus**: [`bus::EventBus`] — semaphore-bounded concurrent handler
//!   fan-out with fault isolation, bounded history, drain-bounded shutdown
//! - **Handlers**: [`bus::EventHandler`] contract + [`handlers`] built-ins
//! - **Stores**: [`store::MemoryStore`] fast primary,
//!   [`store::SqliteStore`] relational fallback, composed by
//!   [`store::HybridGateway`] with swallow-and-log write semantics
//! - **Lineage**: [`lineage::LineageTracker`] — root resolution, chain
//!   and tree reconstruction with explicit cycle reporting
//! - **Orchestrator**: [`orchestrator::EventOrchestrator`] — the
//!   lifecycle-managed facade producers publish through
//!
//! ## Crate Position
//!
//! Engine layer. Depends on: cascade-core.
//! Depended on by: cascade-runtime.

#![deny(unsafe_code)]

pub mod bus;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod lineage;
pub mod orchestrator;
pub mod store;

pub use bus::{EventBus, EventHandler, Subscription};
pub use config::{BusConfig, CascadeConfig, OrchestratorConfig, StoreConfig};
pub use errors::{EventsError, HandlerError, Result};
pub use lineage::{build_event_tree, DisabledLineage, EventNode, EventTree, Lineage, LineageTracker};
pub use orchestrator::EventOrchestrator;
pub use store::{
    DisabledPersistence, EventRecord, EventStore, HybridGateway, MemoryStore, Persistence,
    SqliteStore,
};

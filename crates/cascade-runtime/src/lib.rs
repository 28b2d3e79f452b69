//! # cascade-runtime
//!
//! Agent execution runtime. Drives a pluggable step executor through a
//! bounded loop, publishing lifecycle events to the orchestration core
//! as it goes and honouring user interrupts between steps.
//!
//! ## Crate Position
//!
//! Sits on top of `cascade-events`: agents publish and query through
//! an [`EventOrchestrator`](cascade_events::EventOrchestrator) handle
//! and never touch the bus or stores directly.

#![deny(unsafe_code)]

pub mod agent;
pub mod errors;
pub mod sandbox;
pub mod state;

pub use agent::{Agent, AgentConfig, StepContext, StepExecutor, StepOutcome};
pub use errors::{Result, RuntimeError};
pub use sandbox::{NoopGuard, ResourceGuard};
pub use state::AgentState;

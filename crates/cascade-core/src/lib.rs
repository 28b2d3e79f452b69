//! # cascade-core
//!
//! Foundation types for the Cascade event orchestration engine.
//!
//! This crate provides the shared vocabulary the other cascade crates
//! depend on:
//!
//! - **Events**: [`event::Event`] — the unit of communication, with
//!   guarded status transitions, causal lineage fields, and factory
//!   helpers for the well-known event types
//! - **Taxonomy**: [`event::taxonomy`] — dotted event-type constants
//!   (`conversation.userinput`, `agent.step.start`, `system.error`, …)
//! - **Memory**: [`memory::Memory`] — ordered message memory for the
//!   agent step loop
//! - **Errors**: [`errors::CoreError`] via `thiserror`
//! - **Logging**: [`logging::init_logging`] tracing setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `cascade-events` and
//! `cascade-runtime`.

#![deny(unsafe_code)]

pub mod errors;
pub mod event;
pub mod logging;
pub mod memory;

pub use errors::CoreError;
pub use event::{Event, EventPriority, EventStatus};
pub use memory::{Memory, Message, Role};

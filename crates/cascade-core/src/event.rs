//! The [`Event`] type — the unit of communication on the bus.
//!
//! Events carry an immutable identity (`event_id`, `event_type`,
//! `timestamp`, `source`) plus mutable processing state (`status`,
//! `processed_by`, `error_message`) and causal lineage fields
//! (`parent_events`, `root_event_id`). Status moves monotonically
//! pending → processing → {completed | failed | cancelled}; a
//! backward transition is rejected with [`CoreError::InvalidTransition`]
//! rather than applied. Once terminal, an event is immutable except
//! for `error_message` append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::{CoreError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Taxonomy
// ─────────────────────────────────────────────────────────────────────────────

/// Well-known dotted event-type strings.
///
/// Convention: `<domain>.<action>[.<qualifier>]`. External consumers
/// subscribe by exact type or wildcard, so these strings are a wire
/// contract — do not rename casually.
pub mod taxonomy {
    /// User submitted input to a conversation.
    pub const USER_INPUT: &str = "conversation.userinput";
    /// A user-requested stop for the active conversation.
    pub const INTERRUPT: &str = "conversation.interrupt";
    /// Agent step loop entered a step.
    pub const AGENT_STEP_START: &str = "agent.step.start";
    /// Agent step loop completed a step.
    pub const AGENT_STEP_COMPLETE: &str = "agent.step.complete";
    /// A tool execution status change.
    pub const TOOL_EXECUTION: &str = "tool.execution";
    /// An uncaught component fault.
    pub const SYSTEM_ERROR: &str = "system.error";
    /// Orchestrator came up.
    pub const SYSTEM_STARTUP: &str = "system.startup";
    /// Orchestrator is going down.
    pub const SYSTEM_SHUTDOWN: &str = "system.shutdown";
}

// ─────────────────────────────────────────────────────────────────────────────
// Status / priority
// ─────────────────────────────────────────────────────────────────────────────

/// Event processing status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Admitted, not yet dispatched.
    Pending,
    /// Handler fan-out in flight.
    Processing,
    /// At least one handler succeeded (or none matched).
    Completed,
    /// Every matched handler failed.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl EventStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Ordering rank used to enforce monotonic transitions.
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed | Self::Cancelled => 2,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Event priority. Advisory: the dispatcher uses it only to order the
/// handler list deterministically, never to preempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    /// Background noise.
    Low,
    /// Default.
    #[default]
    Normal,
    /// Time-sensitive.
    High,
    /// Faults and interrupts.
    Critical,
}

// ─────────────────────────────────────────────────────────────────────────────
// Event
// ─────────────────────────────────────────────────────────────────────────────

/// A single event routed through the bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique ID (`evt_` + UUID v7).
    pub event_id: String,
    /// Dotted taxonomy string, e.g. `agent.step.start`.
    pub event_type: String,
    /// Creation time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Producing component.
    pub source: String,
    /// Optional target component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Conversation correlation key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// User correlation key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Session correlation key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Opaque payload.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Processing status.
    pub status: EventStatus,
    /// Advisory priority.
    #[serde(default)]
    pub priority: EventPriority,
    /// Ordered parent event IDs (empty for root events).
    #[serde(default)]
    pub parent_events: Vec<String>,
    /// Resolved root of this event's causal chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_event_id: Option<String>,
    /// Names of handlers that succeeded.
    #[serde(default)]
    pub processed_by: Vec<String>,
    /// Failure detail, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Event {
    /// Create a pending event with a fresh ID and the current UTC time.
    #[must_use]
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_id: format!("evt_{}", Uuid::now_v7()),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            source: source.into(),
            target: None,
            conversation_id: None,
            user_id: None,
            session_id: None,
            data: Map::new(),
            metadata: Map::new(),
            status: EventStatus::Pending,
            priority: EventPriority::Normal,
            parent_events: Vec::new(),
            root_event_id: None,
            processed_by: Vec::new(),
            error_message: None,
        }
    }

    /// Set the conversation correlation key.
    #[must_use]
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Set the user correlation key.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the session correlation key.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the target component.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set the advisory priority.
    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a payload entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.data.insert(key.into(), value);
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.metadata.insert(key.into(), value);
        self
    }

    /// Set the parent event IDs.
    #[must_use]
    pub fn with_parents(mut self, parents: Vec<String>) -> Self {
        self.parent_events = parents;
        self
    }

    /// Whether the event has reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Advance the status. Transitions must increase monotonically
    /// (pending → processing → terminal); anything else is rejected.
    pub fn advance(&mut self, to: EventStatus) -> Result<()> {
        if to.rank() <= self.status.rank() {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Mark the event as in-flight.
    pub fn mark_processing(&mut self) -> Result<()> {
        self.advance(EventStatus::Processing)
    }

    /// Mark the event completed.
    pub fn mark_completed(&mut self) -> Result<()> {
        self.advance(EventStatus::Completed)
    }

    /// Mark the event failed, recording the failure detail.
    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<()> {
        self.advance(EventStatus::Failed)?;
        self.append_error(message);
        Ok(())
    }

    /// Mark the event cancelled.
    pub fn mark_cancelled(&mut self) -> Result<()> {
        self.advance(EventStatus::Cancelled)
    }

    /// Append failure detail. Permitted even after a terminal status —
    /// the one mutation terminal events allow.
    pub fn append_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        match &mut self.error_message {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(&message);
            }
            None => self.error_message = Some(message),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Create a `conversation.userinput` event.
#[must_use]
pub fn user_input_event(conversation_id: impl Into<String>, content: impl Into<String>) -> Event {
    Event::new(taxonomy::USER_INPUT, "user")
        .with_conversation(conversation_id)
        .with_priority(EventPriority::High)
        .with_data("content", Value::String(content.into()))
}

/// Create a `conversation.interrupt` event.
#[must_use]
pub fn interrupt_event(conversation_id: impl Into<String>) -> Event {
    Event::new(taxonomy::INTERRUPT, "user")
        .with_conversation(conversation_id)
        .with_priority(EventPriority::Critical)
}

/// Create an `agent.step.start` event.
#[must_use]
pub fn step_start_event(agent_name: &str, step: u32, conversation_id: Option<&str>) -> Event {
    let mut event = Event::new(taxonomy::AGENT_STEP_START, agent_name)
        .with_data("step_number", Value::from(step));
    if let Some(id) = conversation_id {
        event = event.with_conversation(id);
    }
    event
}

/// Create an `agent.step.complete` event.
#[must_use]
pub fn step_complete_event(
    agent_name: &str,
    step: u32,
    result: &str,
    conversation_id: Option<&str>,
) -> Event {
    let mut event = Event::new(taxonomy::AGENT_STEP_COMPLETE, agent_name)
        .with_data("step_number", Value::from(step))
        .with_data("result", Value::String(result.to_string()));
    if let Some(id) = conversation_id {
        event = event.with_conversation(id);
    }
    event
}

/// Create a `tool.execution` event.
#[must_use]
pub fn tool_execution_event(
    tool_name: &str,
    status: &str,
    parameters: Map<String, Value>,
    conversation_id: Option<&str>,
) -> Event {
    let mut event = Event::new(taxonomy::TOOL_EXECUTION, tool_name)
        .with_data("tool_name", Value::String(tool_name.to_string()))
        .with_data("status", Value::String(status.to_string()))
        .with_data("parameters", Value::Object(parameters));
    if let Some(id) = conversation_id {
        event = event.with_conversation(id);
    }
    event
}

/// Create a `system.error` event.
#[must_use]
pub fn system_error_event(
    component: &str,
    error_type: &str,
    error_message: &str,
    conversation_id: Option<&str>,
) -> Event {
    let mut event = Event::new(taxonomy::SYSTEM_ERROR, component)
        .with_priority(EventPriority::Critical)
        .with_data("error_type", Value::String(error_type.to_string()))
        .with_data("error_message", Value::String(error_message.to_string()));
    if let Some(id) = conversation_id {
        event = event.with_conversation(id);
    }
    event
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

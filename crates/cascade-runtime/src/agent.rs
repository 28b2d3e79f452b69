//! Bounded agent step loop.
//!
//! An [`Agent`] owns a conversation-scoped memory and drives a
//! pluggable [`StepExecutor`] for up to `max_steps` iterations,
//! publishing lifecycle events through the orchestrator and checking
//! for user interrupts between steps. The loop detects repeated
//! identical results and nudges the executor with a corrective prompt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use cascade_core::event::{
    step_complete_event, step_start_event, system_error_event, taxonomy, user_input_event,
};
use cascade_core::{Memory, Message, Role};
use cascade_events::EventOrchestrator;

use crate::errors::{Result, RuntimeError};
use crate::sandbox::{NoopGuard, ResourceGuard};
use crate::state::AgentState;

/// How far back a published interrupt event still counts, in seconds.
/// Older interrupts are assumed to target an earlier run.
const INTERRUPT_WINDOW_SECS: i64 = 30;

const STUCK_PROMPT: &str = "Observed duplicate responses. Consider new strategies and avoid \
repeating steps already attempted.";

// ─── Executor seam ───────────────────────────────────────────────────────────

/// What one step produced.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Keep looping with this result.
    Continue(String),
    /// This was the final step; the agent transitions to finished.
    Finish(String),
}

impl StepOutcome {
    /// The step's textual result.
    #[must_use]
    pub fn result(&self) -> &str {
        match self {
            Self::Continue(s) | Self::Finish(s) => s,
        }
    }
}

/// Mutable view of the agent handed to the executor for one step.
pub struct StepContext<'a> {
    /// Conversation memory, including the run's opening request.
    pub memory: &'a mut Memory,
    /// Prompt for the next step. The loop overwrites this with a
    /// corrective prompt when the agent looks stuck.
    pub next_step_prompt: &'a mut Option<String>,
    /// Conversation this run belongs to, when bound to one.
    pub conversation_id: Option<&'a str>,
    /// One-based step number.
    pub step: u32,
}

/// The pluggable brain of an agent: produces one step result at a
/// time. Implementations signal completion via [`StepOutcome::Finish`].
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute one step.
    async fn step(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome>;
}

// ─── Agent ───────────────────────────────────────────────────────────────────

/// Agent loop tuning knobs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hard cap on steps per run.
    pub max_steps: u32,
    /// Earlier identical results tolerated before the stuck nudge
    /// fires.
    pub duplicate_threshold: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            duplicate_threshold: 2,
        }
    }
}

/// A stateful agent bound to one conversation at a time.
pub struct Agent {
    name: String,
    orchestrator: Arc<EventOrchestrator>,
    executor: Box<dyn StepExecutor>,
    config: AgentConfig,
    guard: Box<dyn ResourceGuard>,
    state: AgentState,
    memory: Memory,
    conversation_id: Option<String>,
    current_step: u32,
    next_step_prompt: Option<String>,
    interrupted: Arc<AtomicBool>,
}

impl Agent {
    /// Create an agent with default configuration and no external
    /// resources.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        orchestrator: Arc<EventOrchestrator>,
        executor: Box<dyn StepExecutor>,
    ) -> Self {
        Self::with_config(name, orchestrator, executor, AgentConfig::default())
    }

    /// Create an agent with explicit configuration.
    #[must_use]
    pub fn with_config(
        name: impl Into<String>,
        orchestrator: Arc<EventOrchestrator>,
        executor: Box<dyn StepExecutor>,
        config: AgentConfig,
    ) -> Self {
        Self {
            name: name.into(),
            orchestrator,
            executor,
            config,
            guard: Box::new(NoopGuard),
            state: AgentState::default(),
            memory: Memory::default(),
            conversation_id: None,
            current_step: 0,
            next_step_prompt: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach a resource guard released when every run ends.
    #[must_use]
    pub fn with_guard(mut self, guard: Box<dyn ResourceGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Step counter of the current (or last) run.
    #[must_use]
    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    /// Conversation memory.
    #[must_use]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Conversation bound by the current (or last) run.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Latch an interrupt. The next between-step check stops the run.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Clone of the interrupt latch, usable from other tasks.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Clear the interrupt latch.
    ///
    /// The latch never clears itself: once set (directly or via a
    /// published interrupt event) it stops every subsequent run until
    /// reset. Call this before reusing an agent after an interrupt.
    pub fn reset_interrupt(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    /// Run the loop for one request. Only an idle agent can start.
    ///
    /// Both arguments are optional: without a request the run starts
    /// from whatever the memory already holds, and without a
    /// conversation the loop skips interrupt-event polling (the local
    /// latch still applies) and publishes unscoped step events.
    ///
    /// Returns the per-step results joined by newlines. An executor
    /// error aborts the run, leaves the agent in the error state and
    /// propagates after cleanup.
    pub async fn run(
        &mut self,
        request: Option<&str>,
        conversation_id: Option<&str>,
    ) -> Result<String> {
        if self.state != AgentState::Idle {
            return Err(RuntimeError::InvalidState(self.state));
        }
        self.state = AgentState::Running;
        self.conversation_id = conversation_id.map(ToOwned::to_owned);
        if let Some(request) = request {
            self.memory.add(Message::user(request));
            if let Some(conversation_id) = conversation_id {
                let _ = self
                    .orchestrator
                    .publish(user_input_event(conversation_id, request));
            }
        }
        info!(agent = %self.name, conversation_id, "run started");

        let outcome = self.run_loop(conversation_id).await;

        // Cleanup happens on every exit path before the result
        // propagates.
        self.guard.release().await;

        match outcome {
            Ok(results) => {
                // A run that neither finished nor errored returns the
                // agent to idle for reuse; so does an interrupted one,
                // even when the final step had finished.
                if self.state == AgentState::Running || self.interrupted.load(Ordering::SeqCst) {
                    self.state = AgentState::Idle;
                    self.current_step = 0;
                }
                if results.is_empty() {
                    Ok("No steps executed".to_owned())
                } else {
                    Ok(results.join("\n"))
                }
            }
            Err(err) => {
                self.state = AgentState::Error;
                let _ = self.orchestrator.publish(system_error_event(
                    &self.name,
                    "step_failure",
                    &err.to_string(),
                    conversation_id,
                ));
                Err(err)
            }
        }
    }

    async fn run_loop(&mut self, conversation_id: Option<&str>) -> Result<Vec<String>> {
        let mut results = Vec::new();

        while self.current_step < self.config.max_steps && self.state == AgentState::Running {
            self.current_step += 1;
            let step = self.current_step;

            if self.check_interrupt(conversation_id) {
                results.push(format!("Interrupted at step {step}"));
                break;
            }

            let _ = self
                .orchestrator
                .publish(step_start_event(&self.name, step, conversation_id));

            let outcome = {
                let mut ctx = StepContext {
                    memory: &mut self.memory,
                    next_step_prompt: &mut self.next_step_prompt,
                    conversation_id,
                    step,
                };
                self.executor.step(&mut ctx).await?
            };
            let result = outcome.result().to_owned();

            if let StepOutcome::Finish(_) = outcome {
                self.state = AgentState::Finished;
            }
            self.memory.add(Message::assistant(result.clone()));

            // An interrupt observed here suppresses both the result
            // line and the step-complete event for the halted step.
            if self.check_interrupt(conversation_id) {
                results.push(format!("Interrupted after step {step}"));
                break;
            }

            let _ = self.orchestrator.publish(step_complete_event(
                &self.name,
                step,
                &result,
                conversation_id,
            ));

            if self.is_stuck() {
                self.handle_stuck();
            }
            results.push(format!("Step {step}: {result}"));
        }

        if self.interrupted.load(Ordering::SeqCst) {
            results.push("Execution interrupted by user".to_owned());
            info!(agent = %self.name, "run interrupted");
        } else if self.state == AgentState::Running {
            results.push(format!(
                "Terminated: Reached max steps ({})",
                self.config.max_steps
            ));
            info!(agent = %self.name, max_steps = self.config.max_steps, "step budget exhausted");
        } else {
            info!(agent = %self.name, steps = self.current_step, "run finished");
        }

        Ok(results)
    }

    /// Whether an interrupt is pending, from the local latch or a
    /// recently published interrupt event for this conversation.
    /// Without a conversation only the latch is consulted.
    fn check_interrupt(&self, conversation_id: Option<&str>) -> bool {
        if self.interrupted.load(Ordering::SeqCst) {
            return true;
        }
        let Some(conversation_id) = conversation_id else {
            return false;
        };
        let cutoff = Utc::now() - Duration::seconds(INTERRUPT_WINDOW_SECS);
        let recent = self.orchestrator.get_recent_events(
            10,
            Some(conversation_id),
            Some(taxonomy::INTERRUPT),
        );
        if recent.iter().any(|e| e.timestamp >= cutoff) {
            debug!(agent = %self.name, conversation_id, "interrupt event observed");
            self.interrupted.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    /// The loop is stuck when the latest assistant result already
    /// appears among at least `duplicate_threshold` earlier assistant
    /// entries.
    fn is_stuck(&self) -> bool {
        let messages = self.memory.messages();
        let Some(last) = messages.last() else {
            return false;
        };
        if last.role != Role::Assistant || last.content.is_empty() {
            return false;
        }
        let duplicates = messages[..messages.len() - 1]
            .iter()
            .filter(|m| m.role == Role::Assistant && m.content == last.content)
            .count();
        duplicates >= self.config.duplicate_threshold
    }

    fn handle_stuck(&mut self) {
        warn!(agent = %self.name, "duplicate results detected, adjusting prompt");
        let prompt = match self.next_step_prompt.take() {
            Some(existing) => format!("{STUCK_PROMPT}\n{existing}"),
            None => STUCK_PROMPT.to_owned(),
        };
        self.next_step_prompt = Some(prompt);
    }
}

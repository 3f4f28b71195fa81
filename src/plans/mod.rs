//! Goal-execution plans: one natural-language goal turned into an ordered
//! sequence of machine-actionable steps.
//!
//! This module provides:
//! - The plan/step data model and its status lifecycle
//! - LLM-based plan generation from a goal plus a screen capture
//! - A budgeted executor state machine with pause/resume/stop
//! - Vision-guided failure recovery (retry/skip/abort)
//! - A bounded execution history with best-effort persistence

mod budget;
mod executor;
mod generation;
mod history;
mod recovery;
mod runner;
mod store;

pub use budget::BudgetTracker;
pub use executor::PlanExecutor;
pub use generation::{PlanGenerator, DEFAULT_STEP_MAX_ATTEMPTS};
pub use history::{ExecutionHistory, DEFAULT_HISTORY_CAPACITY};
pub use recovery::{RecoveryAction, RecoveryAdvisor};
pub use runner::{StepRunner, VERIFY_CONFIDENCE_THRESHOLD};
pub use store::SqliteHistorySink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::ScrollDirection;

/// One goal-execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique identifier (UUID)
    pub id: String,

    /// The natural-language goal this plan pursues
    pub goal: String,

    /// Ordered steps, fixed after creation
    pub steps: Vec<Step>,

    /// Index of the current step (0-based); equals `steps.len()` when done
    pub current_step: usize,

    /// Overall plan status
    pub status: PlanStatus,

    /// Errors collected across the run, one per unrecovered failed attempt
    pub errors: Vec<ErrorRecord>,

    /// Capability calls consumed so far (planning included)
    pub api_calls_used: u32,

    /// Hard ceiling on capability calls
    pub api_calls_max: u32,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Plan {
    /// Create a plan in `Planning` status with all steps pending.
    pub fn new(goal: impl Into<String>, steps: Vec<Step>, api_calls_max: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal: goal.into(),
            steps,
            current_step: 0,
            status: PlanStatus::Planning,
            errors: Vec::new(),
            api_calls_used: 0,
            api_calls_max,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Get the current step, if the cursor is still inside the plan.
    pub fn current_step_ref(&self) -> Option<&Step> {
        self.steps.get(self.current_step)
    }

    /// Get the current step mutably.
    pub fn current_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.get_mut(self.current_step)
    }

    /// Whether the cursor has moved past the last step.
    pub fn cursor_at_end(&self) -> bool {
        self.current_step >= self.steps.len()
    }

    /// Advance the cursor by one step.
    pub fn advance(&mut self) {
        self.current_step += 1;
    }

    /// Mark the current step completed with an optional result.
    pub fn complete_current_step(&mut self, result: Option<String>) {
        if let Some(step) = self.current_step_mut() {
            step.status = StepStatus::Completed;
            step.result = result;
        }
    }

    /// Mark the current step skipped with an optional reason.
    pub fn skip_current_step(&mut self, reason: Option<String>) {
        if let Some(step) = self.current_step_mut() {
            step.status = StepStatus::Skipped;
            step.result = reason;
        }
    }

    /// Mark the current step failed and append an error record.
    pub fn fail_current_step(&mut self, message: String, screenshot: Option<String>) {
        let description = self
            .current_step_ref()
            .map(|s| s.description.clone())
            .unwrap_or_default();
        if let Some(step) = self.current_step_mut() {
            step.status = StepStatus::Failed;
            step.error = Some(message.clone());
        }
        self.errors.push(ErrorRecord {
            step_description: description,
            message,
            screenshot,
            timestamp: Utc::now(),
            recovered: false,
        });
    }

    /// Flip the newest error record to recovered (a retry later succeeded,
    /// or the step was skipped past).
    pub fn mark_last_error_recovered(&mut self) {
        if let Some(record) = self.errors.last_mut() {
            record.recovered = true;
        }
    }

    /// Count completed steps.
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// Whether the plan reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Total wall-clock duration in seconds (so far, for live plans).
    pub fn duration_secs(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_seconds().max(0) as u64
    }
}

/// A single step in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier (UUID)
    pub id: String,

    /// Human-readable description of what the step does
    pub description: String,

    /// The machine-actionable operation
    pub action: StepAction,

    /// Step status
    pub status: StepStatus,

    /// Times the runner has been invoked on this step
    pub attempts: u32,

    /// Attempt ceiling; reaching it makes the step unrecoverable
    pub max_attempts: u32,

    /// What the step produced (analysis text, verification reason, ...)
    pub result: Option<String>,

    /// Error message from the latest failed attempt
    pub error: Option<String>,

    /// Pre-dispatch screen capture, as an opaque data-URL reference
    pub screenshot: Option<String>,

    /// When the runner last dispatched this step
    pub executed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(description: impl Into<String>, action: StepAction, max_attempts: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            action,
            status: StepStatus::Pending,
            attempts: 0,
            max_attempts,
            result: None,
            error: None,
            screenshot: None,
            executed_at: None,
        }
    }

    /// Whether recovery may still re-run this step.
    pub fn attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// The machine-actionable operation a step performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Ask the vision capability to describe the current screen.
    Analyze,
    /// Click a natural-language-described target.
    Click { target: String },
    /// Type literal text into the focused element.
    Type { value: String },
    /// Scroll the active surface.
    Scroll {
        #[serde(default)]
        direction: ScrollDirection,
    },
    /// Sleep for the given duration.
    Wait { duration_ms: u64 },
    /// Ask the vision capability whether the target condition holds.
    Verify { target: String },
}

/// Overall plan status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Steps generated, execution not yet started
    Planning,
    /// The executor loop is driving steps
    Executing,
    /// Stopped at a step boundary (pause requested or budget exhausted);
    /// resumable
    Paused,
    /// All steps done
    Completed,
    /// Aborted by recovery or stopped by the caller
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Planning => "planning",
            PlanStatus::Executing => "executing",
            PlanStatus::Paused => "paused",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Failed)
    }
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started
    Pending,
    /// Currently dispatched
    Executing,
    /// Completed successfully
    Completed,
    /// Failed (recovery may retry)
    Failed,
    /// Skipped by a recovery decision
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Executing => "executing",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

/// One unrecovered (at the time of recording) step failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub step_description: String,
    pub message: String,
    pub screenshot: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub recovered: bool,
}

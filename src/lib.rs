//! screenpilot — an autonomous goal-execution engine for screen automation.
//!
//! The engine turns a natural-language goal into an ordered sequence of
//! machine-actionable steps, executes them against an input/screen effector,
//! observes outcomes, and recovers from failures, all under a hard budget of
//! capability (reasoning/vision model) invocations. A trigger monitor runs
//! alongside it, polling the vision capability and firing condition-gated
//! action sequences against the same effector.
//!
//! This is a library: the caller supplies goal strings and the two external
//! collaborators ([`traits::ModelProvider`], [`traits::Effector`]) and reads
//! plan/statistics snapshots back. No UI, CLI, or wire format lives here.

pub mod capture;
pub mod config;
pub mod effector;
pub mod error;
pub mod plans;
pub mod providers;
pub mod traits;
pub mod triggers;
pub mod utils;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
pub(crate) mod testing;

pub use capture::{ScreenSource, ScreenSourceRegistry, SourceKind};
pub use config::AppConfig;
pub use effector::SharedEffector;
pub use error::EngineError;
pub use plans::{
    BudgetTracker, ExecutionHistory, Plan, PlanExecutor, PlanGenerator, PlanStatus,
    RecoveryAction, RecoveryAdvisor, SqliteHistorySink, Step, StepAction, StepRunner, StepStatus,
};
pub use triggers::{
    ConditionKind, Trigger, TriggerAction, TriggerCondition, TriggerMonitor,
};

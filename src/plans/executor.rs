//! The plan-driving state machine.
//!
//! Transitions: `Planning → Executing → {Completed, Failed, Paused}`, with
//! `Paused → Executing` on resume as the only way back. `Completed` and
//! `Failed` are terminal; terminal plans are archived (by copy) into the
//! execution history and never mutated again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{
    BudgetTracker, ExecutionHistory, Plan, PlanStatus, RecoveryAction, RecoveryAdvisor, StepRunner,
};
use crate::capture::ScreenSourceRegistry;
use crate::effector::SharedEffector;
use crate::traits::ModelProvider;
use crate::utils::truncate_str;

/// Drives one plan from `Planning` to a terminal state.
///
/// Single logical sequence: steps run strictly in order, one at a time, and
/// every capability/effector call is awaited before the next decision.
/// Cancellation is cooperative — `pause()` raises a flag that the loop checks
/// at step boundaries only; a step already dispatched runs to completion.
pub struct PlanExecutor {
    plan: Mutex<Plan>,
    runner: StepRunner,
    advisor: RecoveryAdvisor,
    budget: Arc<BudgetTracker>,
    history: Arc<ExecutionHistory>,
    stop_requested: AtomicBool,
}

impl PlanExecutor {
    pub fn new(
        plan: Plan,
        provider: Arc<dyn ModelProvider>,
        effector: SharedEffector,
        registry: Arc<ScreenSourceRegistry>,
        history: Arc<ExecutionHistory>,
    ) -> Self {
        let budget = Arc::new(BudgetTracker::with_used(
            plan.api_calls_used,
            plan.api_calls_max,
        ));
        let runner = StepRunner::new(
            provider.clone(),
            effector.clone(),
            registry.clone(),
            budget.clone(),
        );
        let advisor = RecoveryAdvisor::new(provider, effector, registry, budget.clone());
        Self {
            plan: Mutex::new(plan),
            runner,
            advisor,
            budget,
            history,
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Start executing a freshly generated plan. Anything other than a plan
    /// in `Planning` status is a logged no-op returning the untouched
    /// snapshot.
    pub async fn run(&self) -> Plan {
        {
            let mut plan = self.plan.lock().await;
            if plan.status != PlanStatus::Planning {
                warn!(
                    plan_id = %plan.id,
                    status = plan.status.as_str(),
                    "run() on a plan that is not in planning; ignoring"
                );
                return plan.clone();
            }
            plan.status = PlanStatus::Executing;
            info!(
                plan_id = %plan.id,
                goal = %truncate_str(&plan.goal, 80),
                steps = plan.steps.len(),
                "Plan execution started"
            );
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        self.drive().await
    }

    /// Resume a budget- or caller-paused plan at the current cursor. Only
    /// valid from `Paused`; re-entrant resumes and resumes of terminal plans
    /// are logged no-ops.
    pub async fn resume(&self) -> Plan {
        {
            let mut plan = self.plan.lock().await;
            if plan.status != PlanStatus::Paused {
                warn!(
                    plan_id = %plan.id,
                    status = plan.status.as_str(),
                    "resume() on a plan that is not paused; ignoring"
                );
                return plan.clone();
            }
            plan.status = PlanStatus::Executing;
            info!(plan_id = %plan.id, step = plan.current_step, "Plan resumed");
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        self.drive().await
    }

    /// Request a pause. Takes effect at the next step boundary; the step in
    /// flight (if any) runs to completion.
    pub fn pause(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Pause, then force the plan terminal. Remaining plan state is
    /// deliberately discarded: the plan ends `Failed` even if steps remain.
    pub async fn stop(&self) -> Plan {
        self.stop_requested.store(true, Ordering::SeqCst);
        let mut plan = self.plan.lock().await;
        if plan.status.is_terminal() {
            return plan.clone();
        }
        plan.status = PlanStatus::Failed;
        plan.ended_at = Some(Utc::now());
        plan.api_calls_used = self.budget.used();
        warn!(
            plan_id = %plan.id,
            step = plan.current_step,
            "Plan stopped; remaining steps discarded"
        );
        let snapshot = plan.clone();
        drop(plan);
        self.history.append(snapshot.clone()).await;
        snapshot
    }

    /// Cloned view of the live plan for caller inspection.
    pub async fn snapshot(&self) -> Plan {
        self.plan.lock().await.clone()
    }

    /// Budget counters, readable without touching the plan lock.
    pub fn budget(&self) -> Arc<BudgetTracker> {
        self.budget.clone()
    }

    /// Lift the capability-call ceiling so a budget-paused plan can resume.
    pub async fn raise_ceiling(&self, new_max: u32) {
        self.budget.raise_ceiling(new_max);
        let mut plan = self.plan.lock().await;
        plan.api_calls_max = self.budget.max();
        info!(plan_id = %plan.id, api_calls_max = plan.api_calls_max, "Budget ceiling raised");
    }

    /// The driving loop. Explicitly bounded: recovery retries happen at most
    /// once per cycle, and per-step attempt ceilings plus the budget guard
    /// terminate persistent failure.
    async fn drive(&self) -> Plan {
        loop {
            // Step boundary: the only place pause/stop take effect.
            if self.stop_requested.load(Ordering::SeqCst) {
                let mut plan = self.plan.lock().await;
                if !plan.status.is_terminal() {
                    plan.status = PlanStatus::Paused;
                    info!(plan_id = %plan.id, step = plan.current_step, "Plan paused");
                }
                return plan.clone();
            }

            let mut plan = self.plan.lock().await;

            if plan.cursor_at_end() {
                plan.status = PlanStatus::Completed;
                plan.ended_at = Some(Utc::now());
                plan.api_calls_used = self.budget.used();
                info!(
                    plan_id = %plan.id,
                    steps = plan.steps.len(),
                    api_calls_used = plan.api_calls_used,
                    "Plan completed"
                );
                let snapshot = plan.clone();
                drop(plan);
                self.history.append(snapshot.clone()).await;
                return snapshot;
            }

            if self.runner.execute(&mut plan).await {
                plan.advance();
            } else {
                match self.advisor.diagnose(&mut plan).await {
                    RecoveryAction::Retry => {
                        // One in-cycle retry, as a plain call rather than
                        // recursion. If it fails too, the advisor is not
                        // consulted again this cycle; the loop comes back
                        // around and the attempt/budget guards terminate.
                        // A diagnosis that crossed the ceiling skips the
                        // retry so the overrun stays bounded to one call.
                        if !self.budget.exhausted() && self.runner.execute(&mut plan).await {
                            plan.mark_last_error_recovered();
                            plan.advance();
                        }
                    }
                    RecoveryAction::Skip => {
                        plan.mark_last_error_recovered();
                        plan.skip_current_step(Some("skipped by recovery".to_string()));
                        info!(plan_id = %plan.id, step = plan.current_step, "Step skipped");
                        plan.advance();
                    }
                    RecoveryAction::Abort => {
                        plan.status = PlanStatus::Failed;
                        plan.ended_at = Some(Utc::now());
                        plan.api_calls_used = self.budget.used();
                        warn!(
                            plan_id = %plan.id,
                            step = plan.current_step,
                            errors = plan.errors.len(),
                            "Plan failed"
                        );
                        let snapshot = plan.clone();
                        drop(plan);
                        self.history.append(snapshot.clone()).await;
                        return snapshot;
                    }
                }
            }

            // Budget guard, after every step — successful ones included. A
            // fully executed plan still completes on the next pass even with
            // nothing left to spend.
            if self.budget.exhausted() && !plan.cursor_at_end() {
                plan.api_calls_used = self.budget.used();
                plan.status = PlanStatus::Paused;
                info!(
                    plan_id = %plan.id,
                    api_calls_used = plan.api_calls_used,
                    api_calls_max = plan.api_calls_max,
                    "Budget exhausted; plan paused"
                );
                return plan.clone();
            }
        }
    }
}

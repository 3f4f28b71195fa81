//! Vision-guided failure recovery: retry, skip, or abort a failed step.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use super::{BudgetTracker, Plan, StepAction, StepStatus};
use crate::capture::ScreenSourceRegistry;
use crate::effector::SharedEffector;
use crate::traits::ModelProvider;
use crate::utils::{extract_json_object, truncate_str};

/// What to do about a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Re-run the same step.
    Retry,
    /// Give up on the step and continue with the next one.
    Skip,
    /// Give up on the whole plan.
    Abort,
}

/// Diagnoses failed steps with one vision call.
///
/// Fail-closed: a step out of attempts gets `Abort` without spending budget;
/// a capability failure or an unparseable diagnosis also becomes `Abort`.
/// When the capability is consulted, the call is charged regardless of what
/// comes back.
pub struct RecoveryAdvisor {
    provider: Arc<dyn ModelProvider>,
    effector: SharedEffector,
    registry: Arc<ScreenSourceRegistry>,
    budget: Arc<BudgetTracker>,
}

impl RecoveryAdvisor {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        effector: SharedEffector,
        registry: Arc<ScreenSourceRegistry>,
        budget: Arc<BudgetTracker>,
    ) -> Self {
        Self {
            provider,
            effector,
            registry,
            budget,
        }
    }

    /// Decide how to proceed after the current step failed.
    pub async fn diagnose(&self, plan: &mut Plan) -> RecoveryAction {
        let Some(step) = plan.current_step_ref() else {
            return RecoveryAction::Abort;
        };
        if step.status != StepStatus::Failed {
            warn!(
                plan_id = %plan.id,
                step_index = plan.current_step,
                status = step.status.as_str(),
                "Recovery consulted on a step that is not failed"
            );
            return RecoveryAction::Abort;
        }

        // Out of attempts: abort without wasting a capability call on a step
        // that cannot be retried anyway.
        if !step.attempts_left() {
            info!(
                plan_id = %plan.id,
                step_index = plan.current_step,
                attempts = step.attempts,
                max_attempts = step.max_attempts,
                "Step out of attempts; aborting without diagnosis"
            );
            return RecoveryAction::Abort;
        }

        let prompt = build_diagnosis_prompt(plan, plan.current_step);

        // The current screen helps the diagnosis but its absence shouldn't
        // block one; the failed step carries its own capture already.
        let screenshot = match self.registry.selected() {
            Some(source) => self.effector.screenshot(&source, false).await.ok(),
            None => None,
        };

        self.budget.charge();
        let response = self.provider.generate(&prompt, screenshot.as_ref()).await;
        plan.api_calls_used = self.budget.used();

        let verdict = match response {
            Ok(text) => parse_diagnosis(&text),
            Err(e) => {
                warn!(plan_id = %plan.id, "Recovery capability call failed: {}", e);
                return RecoveryAction::Abort;
            }
        };

        let Some(diagnosis) = verdict else {
            warn!(plan_id = %plan.id, "Recovery diagnosis not parseable; aborting");
            return RecoveryAction::Abort;
        };

        let action = match diagnosis.action.as_str() {
            "retry" => RecoveryAction::Retry,
            "skip" => RecoveryAction::Skip,
            "abort" => RecoveryAction::Abort,
            other => {
                warn!(plan_id = %plan.id, verdict = other, "Unknown recovery verdict; aborting");
                return RecoveryAction::Abort;
            }
        };

        if action == RecoveryAction::Retry {
            if let Some(replacement) = diagnosis.replacement {
                apply_replacement(plan, replacement);
            }
        }

        info!(
            plan_id = %plan.id,
            step_index = plan.current_step,
            verdict = ?action,
            "Recovery diagnosis"
        );
        action
    }
}

fn build_diagnosis_prompt(plan: &Plan, step_index: usize) -> String {
    let step = &plan.steps[step_index];
    format!(
        "A screen-automation step failed and you must decide how to proceed.\n\
         Goal: \"{}\"\n\
         Failed step ({} of {}): \"{}\"\n\
         Error: {}\n\
         Attempt {} of {}.\n\
         The attached screenshot shows the screen as it is now.\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"action\": \"retry\" | \"skip\" | \"abort\", \"reason\": \"...\", \
         \"replacement\": {{\"description\": \"...\", \"target\": \"...\", \"value\": \"...\"}}}}\n\
         \"replacement\" is optional and only honored with \"retry\": it refines \
         the step's description and, where the action takes one, its target or \
         typed value.",
        plan.goal,
        step_index + 1,
        plan.steps.len(),
        step.description,
        step.error.as_deref().unwrap_or("unknown"),
        step.attempts,
        step.max_attempts,
    )
}

#[derive(Debug, Deserialize)]
struct Diagnosis {
    action: String,
    #[serde(default)]
    #[allow(dead_code)] // Accepted from the wire; surfaced only in traces.
    reason: Option<String>,
    #[serde(default)]
    replacement: Option<Replacement>,
}

#[derive(Debug, Deserialize)]
struct Replacement {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

fn parse_diagnosis(text: &str) -> Option<Diagnosis> {
    let json = extract_json_object(text)?;
    match serde_json::from_str(json) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(
                "Diagnosis JSON does not parse: {} ({})",
                e,
                truncate_str(json, 200)
            );
            None
        }
    }
}

/// Refine the failed step in place before a retry. Attempt counts are
/// preserved; only the description and the action's own parameter move.
fn apply_replacement(plan: &mut Plan, replacement: Replacement) {
    let step_index = plan.current_step;
    let plan_id = plan.id.clone();
    let Some(step) = plan.current_step_mut() else {
        return;
    };

    if let Some(description) = replacement.description {
        if !description.trim().is_empty() {
            step.description = description;
        }
    }
    match (&mut step.action, replacement.target, replacement.value) {
        (StepAction::Click { target }, Some(new_target), _) => *target = new_target,
        (StepAction::Verify { target }, Some(new_target), _) => *target = new_target,
        (StepAction::Type { value }, _, Some(new_value)) => *value = new_value,
        _ => {}
    }

    info!(
        plan_id = %plan_id,
        step_index,
        "Applied replacement step from diagnosis"
    );
}

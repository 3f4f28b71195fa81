//! Single-step execution against the effector and vision capability.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{BudgetTracker, Plan, StepAction, StepStatus};
use crate::capture::ScreenSourceRegistry;
use crate::effector::SharedEffector;
use crate::traits::{ModelProvider, Screenshot};
use crate::utils::{extract_json_object, truncate_str};

/// Verification confidence below this is a step failure.
pub const VERIFY_CONFIDENCE_THRESHOLD: f64 = 0.7;

const ANALYZE_PROMPT: &str =
    "Describe the current screen: visible application, key elements, and any \
     dialogs or errors. Two or three sentences, plain text.";

/// Executes one step of a plan.
///
/// Charging rules: Analyze, Click, Scroll and Verify consume one capability
/// call each (click/scroll target resolution goes through the automation
/// capability); Type and Wait are effector-local and free. Failures are
/// absorbed into plan state; `execute` never propagates an error.
pub struct StepRunner {
    provider: Arc<dyn ModelProvider>,
    effector: SharedEffector,
    registry: Arc<ScreenSourceRegistry>,
    budget: Arc<BudgetTracker>,
}

impl StepRunner {
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

    /// Run the plan's current step. Returns true on success.
    pub async fn execute(&self, plan: &mut Plan) -> bool {
        let step_index = plan.current_step;
        if step_index >= plan.steps.len() {
            warn!(plan_id = %plan.id, step_index, "Runner invoked past the last step");
            return false;
        }

        let step = &mut plan.steps[step_index];
        step.status = StepStatus::Executing;
        step.attempts += 1;
        step.executed_at = Some(Utc::now());
        let attempts = step.attempts;
        let description = step.description.clone();
        let action = step.action.clone();

        debug!(
            plan_id = %plan.id,
            step_index,
            attempts,
            step = %truncate_str(&description, 80),
            "Executing step"
        );

        // Pre-dispatch capture, kept on the step for audit and recovery.
        let screenshot = match self.capture().await {
            Ok(shot) => shot,
            Err(e) => {
                let message = format!("screenshot failed: {}", e);
                warn!(plan_id = %plan.id, step_index, "{}", message);
                plan.fail_current_step(message, None);
                plan.api_calls_used = self.budget.used();
                return false;
            }
        };
        let screenshot_ref = screenshot.as_data_url();
        if let Some(step) = plan.current_step_mut() {
            step.screenshot = Some(screenshot_ref.clone());
        }

        let outcome = self.dispatch(&action, &screenshot).await;
        plan.api_calls_used = self.budget.used();

        match outcome {
            Ok(result) => {
                info!(
                    plan_id = %plan.id,
                    step_index,
                    attempts,
                    "Step succeeded"
                );
                if let Some(step) = plan.current_step_mut() {
                    step.status = StepStatus::Completed;
                    step.result = result;
                    step.error = None;
                }
                true
            }
            Err(e) => {
                warn!(
                    plan_id = %plan.id,
                    step_index,
                    attempts,
                    "Step failed: {}",
                    e
                );
                plan.fail_current_step(e.to_string(), Some(screenshot_ref));
                false
            }
        }
    }

    async fn capture(&self) -> anyhow::Result<Screenshot> {
        let Some(source) = self.registry.selected() else {
            anyhow::bail!("no capture source selected");
        };
        self.effector.screenshot(&source, false).await
    }

    /// Dispatch one action. Ok(Some(text)) carries a result for the step.
    async fn dispatch(
        &self,
        action: &StepAction,
        screenshot: &Screenshot,
    ) -> anyhow::Result<Option<String>> {
        match action {
            StepAction::Analyze => {
                self.budget.charge();
                let text = self.provider.generate(ANALYZE_PROMPT, Some(screenshot)).await?;
                Ok(Some(text))
            }
            StepAction::Click { target } => {
                self.budget.charge();
                self.effector.click(target).await?;
                Ok(None)
            }
            StepAction::Type { value } => {
                self.effector.type_text(value).await?;
                Ok(None)
            }
            StepAction::Scroll { direction } => {
                self.budget.charge();
                self.effector.scroll(*direction).await?;
                Ok(None)
            }
            StepAction::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                Ok(None)
            }
            StepAction::Verify { target } => {
                self.budget.charge();
                let prompt = format!(
                    "Check the screenshot for this condition: \"{}\". Respond with \
                     ONLY a JSON object: {{\"confidence\": <0.0-1.0>, \"reason\": \"...\"}}",
                    target
                );
                let response = self.provider.generate(&prompt, Some(screenshot)).await?;
                let verdict = parse_verdict(&response)?;
                if verdict.confidence < VERIFY_CONFIDENCE_THRESHOLD {
                    anyhow::bail!(
                        "verification failed: confidence {:.2} below threshold {:.2}{}",
                        verdict.confidence,
                        VERIFY_CONFIDENCE_THRESHOLD,
                        verdict
                            .reason
                            .as_deref()
                            .map(|r| format!(" ({})", r))
                            .unwrap_or_default()
                    );
                }
                Ok(verdict.reason)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerifyVerdict {
    confidence: f64,
    #[serde(default)]
    reason: Option<String>,
}

fn parse_verdict(text: &str) -> anyhow::Result<VerifyVerdict> {
    let Some(json) = extract_json_object(text) else {
        anyhow::bail!(
            "no JSON object in verification response: {}",
            truncate_str(text.trim(), 200)
        );
    };
    serde_json::from_str(json)
        .map_err(|e| anyhow::anyhow!("verification verdict does not parse: {}", e))
}

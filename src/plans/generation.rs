//! LLM-based plan generation: goal + screen capture in, ordered steps out.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use super::{Plan, Step, StepAction};
use crate::capture::ScreenSourceRegistry;
use crate::effector::SharedEffector;
use crate::error::EngineError;
use crate::traits::{ModelProvider, ScrollDirection};
use crate::utils::{extract_json_array, truncate_str};

/// Attempt ceiling for steps whose descriptor doesn't specify one.
pub const DEFAULT_STEP_MAX_ATTEMPTS: u32 = 3;

/// Hard cap on generated plan length; anything longer is a parse failure.
const MAX_PLAN_STEPS: usize = 15;

const PLAN_PROMPT: &str = r#"You are a screen-automation planner. You are given a goal and a screenshot of the current screen. Break the goal down into a linear sequence of concrete UI actions.

Each step must be one of:
- analyze: describe the current screen (no parameters)
- click: click an element, "target" is a natural-language description of it
- type: type literal text, "value" is the text
- scroll: scroll the page, optional "direction" is "up" or "down"
- wait: pause, "duration_ms" is the wait in milliseconds
- verify: check that a visual condition holds, "target" describes it

Guidelines:
- Keep it concise: 3-8 steps typical
- Steps run strictly in order against the screen state the previous step left
- Only add a verify step at points where continuing blindly would be costly
- Targets must be descriptions a person could point at ("the blue Save button"), never coordinates

Return ONLY a JSON array of step objects. No other text.

Example:
Goal: "Send the drafted reply in the support inbox"
[
  {"action": "click", "description": "Open the first unread conversation", "target": "first unread conversation row"},
  {"action": "verify", "description": "Confirm the draft is present", "target": "reply editor containing drafted text"},
  {"action": "click", "description": "Send the reply", "target": "Send button below the editor"},
  {"action": "verify", "description": "Confirm the reply went out", "target": "sent confirmation or the reply in the thread"}
]

Now plan this goal:
"#;

/// Turns a goal into a [`Plan`] with exactly one reasoning-capability call.
///
/// Does not retry internally; the caller may re-invoke. The planning call
/// itself costs one unit of the plan's budget.
pub struct PlanGenerator {
    provider: Arc<dyn ModelProvider>,
    effector: SharedEffector,
    registry: Arc<ScreenSourceRegistry>,
}

impl PlanGenerator {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        effector: SharedEffector,
        registry: Arc<ScreenSourceRegistry>,
    ) -> Self {
        Self {
            provider,
            effector,
            registry,
        }
    }

    /// Generate a plan for `goal` under a ceiling of `api_calls_max`
    /// capability calls.
    pub async fn create(&self, goal: &str, api_calls_max: u32) -> Result<Plan, EngineError> {
        let Some(source) = self.registry.selected() else {
            return Err(EngineError::Capture(
                "no capture source selected".to_string(),
            ));
        };

        let screenshot = self
            .effector
            .screenshot(&source, false)
            .await
            .map_err(|e| EngineError::Capture(e.to_string()))?;

        let prompt = format!("{}\"{}\"", PLAN_PROMPT, goal);
        let response = self
            .provider
            .generate(&prompt, Some(&screenshot))
            .await
            .map_err(|e| {
                warn!(goal = %truncate_str(goal, 80), "Planning capability call failed: {}", e);
                EngineError::PlanParse(format!("capability call failed: {}", e))
            })?;

        let steps = parse_steps(&response).map_err(|e| EngineError::PlanParse(e.to_string()))?;

        let mut plan = Plan::new(goal, steps, api_calls_max);
        // The planning call itself is budgeted spend.
        plan.api_calls_used = 1;

        info!(
            plan_id = %plan.id,
            steps = plan.steps.len(),
            api_calls_max,
            "Plan generated"
        );
        Ok(plan)
    }
}

/// A step as the planner emits it.
#[derive(Debug, Deserialize)]
struct StepDescriptor {
    action: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    direction: Option<ScrollDirection>,
    #[serde(default)]
    max_attempts: Option<u32>,
}

impl StepDescriptor {
    fn into_step(self) -> anyhow::Result<Step> {
        let action = match self.action.as_str() {
            "analyze" => StepAction::Analyze,
            "click" => StepAction::Click {
                target: self
                    .target
                    .ok_or_else(|| anyhow::anyhow!("click step without target"))?,
            },
            "type" => StepAction::Type {
                value: self
                    .value
                    .ok_or_else(|| anyhow::anyhow!("type step without value"))?,
            },
            "scroll" => StepAction::Scroll {
                direction: self.direction.unwrap_or_default(),
            },
            "wait" => StepAction::Wait {
                duration_ms: self.duration_ms.unwrap_or(1000),
            },
            "verify" => StepAction::Verify {
                target: self
                    .target
                    .ok_or_else(|| anyhow::anyhow!("verify step without target"))?,
            },
            other => anyhow::bail!("unknown step action: {}", other),
        };

        let description = match self.description {
            Some(d) if !d.trim().is_empty() => d,
            _ => default_description(&action),
        };

        Ok(Step::new(
            description,
            action,
            self.max_attempts.unwrap_or(DEFAULT_STEP_MAX_ATTEMPTS),
        ))
    }
}

fn default_description(action: &StepAction) -> String {
    match action {
        StepAction::Analyze => "Analyze the current screen".to_string(),
        StepAction::Click { target } => format!("Click {}", target),
        StepAction::Type { value } => format!("Type \"{}\"", truncate_str(value, 40)),
        StepAction::Scroll { direction } => format!("Scroll {:?}", direction).to_lowercase(),
        StepAction::Wait { duration_ms } => format!("Wait {} ms", duration_ms),
        StepAction::Verify { target } => format!("Verify {}", target),
    }
}

/// Parse a step list out of free-form capability text.
fn parse_steps(text: &str) -> anyhow::Result<Vec<Step>> {
    let Some(json) = extract_json_array(text) else {
        anyhow::bail!(
            "no JSON array in response: {}",
            truncate_str(text.trim(), 200)
        );
    };

    let descriptors: Vec<StepDescriptor> = serde_json::from_str(json).map_err(|e| {
        anyhow::anyhow!(
            "step list does not parse: {} ({})",
            e,
            truncate_str(json, 200)
        )
    })?;

    if descriptors.is_empty() {
        anyhow::bail!("planner returned an empty step list");
    }
    if descriptors.len() > MAX_PLAN_STEPS {
        anyhow::bail!(
            "planner returned {} steps (max {})",
            descriptors.len(),
            MAX_PLAN_STEPS
        );
    }

    descriptors.into_iter().map(|d| d.into_step()).collect()
}

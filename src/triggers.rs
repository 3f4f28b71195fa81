//! Continuous trigger monitor: poll the vision capability, fire
//! condition-gated action sequences.
//!
//! Runs independently of any plan, on its own tick, and contends with the
//! plan executor for the shared effector (the [`crate::effector::SharedEffector`]
//! lock arbitrates; first acquirer wins).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::ScreenSourceRegistry;
use crate::effector::SharedEffector;
use crate::traits::{ModelProvider, Screenshot};
use crate::utils::{extract_json_object, truncate_str};

/// Default poll tick.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// What a condition asks the perception capability to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Object,
    Face,
    Pose,
    Behavior,
    Zone,
}

impl ConditionKind {
    fn as_prompt_noun(&self) -> &'static str {
        match self {
            ConditionKind::Object => "object",
            ConditionKind::Face => "face",
            ConditionKind::Pose => "pose",
            ConditionKind::Behavior => "behavior",
            ConditionKind::Zone => "zone occupancy",
        }
    }
}

/// One perception check; holds when the returned confidence reaches the
/// threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub kind: ConditionKind,
    pub target: String,
    pub threshold: f64,
}

/// One automation action in a trigger's firing sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerAction {
    Click { target: String },
    Type { value: String },
    Open { url: String },
    Notify { title: String, message: String },
    Record { duration_ms: u64 },
    Screenshot,
    Script { command: String },
}

/// An operator-defined trigger: all conditions must hold (AND), actions run
/// in order with no rollback, and firings are rate-limited by `cooldown_ms`
/// measured from the start of the previous firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub conditions: Vec<TriggerCondition>,
    pub actions: Vec<TriggerAction>,
    pub cooldown_ms: u64,
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl Trigger {
    pub fn new(
        name: impl Into<String>,
        conditions: Vec<TriggerCondition>,
        actions: Vec<TriggerAction>,
        cooldown_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            enabled: true,
            conditions,
            actions,
            cooldown_ms,
            last_fired_at: None,
        }
    }

    /// Whether the trigger is still inside its cooldown window at `now`.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_fired_at {
            Some(fired) => {
                now.signed_duration_since(fired)
                    < chrono::Duration::milliseconds(self.cooldown_ms as i64)
            }
            None => false,
        }
    }
}

/// Periodic evaluator for the registered triggers.
pub struct TriggerMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    provider: Arc<dyn ModelProvider>,
    effector: SharedEffector,
    registry: Arc<ScreenSourceRegistry>,
    triggers: tokio::sync::Mutex<Vec<Trigger>>,
    poll_interval: Duration,
    running: AtomicBool,
}

impl TriggerMonitor {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        effector: SharedEffector,
        registry: Arc<ScreenSourceRegistry>,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                provider,
                effector,
                registry,
                triggers: tokio::sync::Mutex::new(Vec::new()),
                poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
                running: AtomicBool::new(false),
            }),
        }
    }

    // -- operator CRUD ------------------------------------------------------

    /// Register a trigger; returns its id.
    pub async fn add_trigger(&self, trigger: Trigger) -> String {
        let id = trigger.id.clone();
        info!(trigger_id = %id, name = %trigger.name, "Trigger added");
        self.inner.triggers.lock().await.push(trigger);
        id
    }

    /// Replace a trigger in place (matched by id). Returns false if unknown.
    pub async fn update_trigger(&self, trigger: Trigger) -> bool {
        let mut triggers = self.inner.triggers.lock().await;
        match triggers.iter_mut().find(|t| t.id == trigger.id) {
            Some(slot) => {
                *slot = trigger;
                true
            }
            None => false,
        }
    }

    /// Remove a trigger by id. Returns false if unknown.
    pub async fn remove_trigger(&self, id: &str) -> bool {
        let mut triggers = self.inner.triggers.lock().await;
        let before = triggers.len();
        triggers.retain(|t| t.id != id);
        before != triggers.len()
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut triggers = self.inner.triggers.lock().await;
        match triggers.iter_mut().find(|t| t.id == id) {
            Some(t) => {
                t.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub async fn list_triggers(&self) -> Vec<Trigger> {
        self.inner.triggers.lock().await.clone()
    }

    // -- lifecycle ----------------------------------------------------------

    /// Spawn the poll loop. Starting an already-running monitor is a
    /// warn-level no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Trigger monitor already running; start ignored");
            return;
        }
        info!(
            poll_interval_ms = self.inner.poll_interval.as_millis() as u64,
            "Trigger monitor started"
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(inner.poll_interval).await;
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                MonitorInner::tick(&inner).await;
            }
            debug!("Trigger monitor loop exited");
        });
    }

    /// Stop the poll loop. Stopping a stopped monitor is a no-op.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            warn!("Trigger monitor not running; stop ignored");
            return;
        }
        info!("Trigger monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run a single evaluation pass over all triggers. The poll loop calls
    /// this every tick; tests call it directly for determinism.
    pub async fn tick(&self) {
        MonitorInner::tick(&self.inner).await;
    }
}

impl MonitorInner {
    async fn tick(inner: &Arc<MonitorInner>) {
        let now = Utc::now();
        let mut triggers = inner.triggers.lock().await;

        for trigger in triggers.iter_mut() {
            if !trigger.enabled || trigger.in_cooldown(now) {
                continue;
            }

            if !inner.conditions_hold(trigger).await {
                continue;
            }

            // Stamped at the start of the firing: cooldown measures from
            // here regardless of how long the actions take, and a failing
            // action cannot re-arm the trigger early.
            trigger.last_fired_at = Some(Utc::now());
            info!(trigger_id = %trigger.id, name = %trigger.name, "Trigger fired");

            for (index, action) in trigger.actions.iter().enumerate() {
                if let Err(e) = inner.execute_action(action).await {
                    warn!(
                        trigger_id = %trigger.id,
                        action_index = index,
                        "Trigger action failed; aborting remaining actions for this firing: {}",
                        e
                    );
                    break;
                }
            }
        }
    }

    /// AND over all conditions; any capability failure or sub-threshold
    /// confidence blocks the firing.
    async fn conditions_hold(&self, trigger: &Trigger) -> bool {
        if trigger.conditions.is_empty() {
            return false;
        }

        let Some(source) = self.registry.selected() else {
            debug!(trigger_id = %trigger.id, "No capture source selected; skipping evaluation");
            return false;
        };
        let screenshot = match self.effector.screenshot(&source, false).await {
            Ok(shot) => shot,
            Err(e) => {
                warn!(trigger_id = %trigger.id, "Capture failed during evaluation: {}", e);
                return false;
            }
        };

        for condition in &trigger.conditions {
            match self.evaluate_condition(condition, &screenshot).await {
                Some(confidence) if confidence >= condition.threshold => {
                    debug!(
                        trigger_id = %trigger.id,
                        target = %condition.target,
                        confidence,
                        "Condition holds"
                    );
                }
                Some(confidence) => {
                    debug!(
                        trigger_id = %trigger.id,
                        target = %condition.target,
                        confidence,
                        threshold = condition.threshold,
                        "Condition below threshold"
                    );
                    return false;
                }
                None => return false,
            }
        }
        true
    }

    async fn evaluate_condition(
        &self,
        condition: &TriggerCondition,
        screenshot: &Screenshot,
    ) -> Option<f64> {
        let prompt = format!(
            "Look for this {} in the screenshot: \"{}\". Respond with ONLY a \
             JSON object: {{\"confidence\": <0.0-1.0>}}",
            condition.kind.as_prompt_noun(),
            condition.target
        );

        let response = match self.provider.generate(&prompt, Some(screenshot)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(target = %condition.target, "Perception call failed: {}", e);
                return None;
            }
        };

        let Some(json) = extract_json_object(&response) else {
            warn!(
                target = %condition.target,
                "No JSON in perception response: {}",
                truncate_str(response.trim(), 120)
            );
            return None;
        };

        #[derive(Deserialize)]
        struct Detection {
            confidence: f64,
        }
        match serde_json::from_str::<Detection>(json) {
            Ok(d) => Some(d.confidence),
            Err(e) => {
                warn!(target = %condition.target, "Perception verdict does not parse: {}", e);
                None
            }
        }
    }

    async fn execute_action(&self, action: &TriggerAction) -> anyhow::Result<()> {
        match action {
            TriggerAction::Click { target } => self.effector.click(target).await,
            TriggerAction::Type { value } => self.effector.type_text(value).await,
            TriggerAction::Open { url } => self.effector.open_url(url).await,
            TriggerAction::Notify { title, message } => self.effector.notify(title, message).await,
            TriggerAction::Record { duration_ms } => {
                self.effector.record_screen(*duration_ms).await
            }
            TriggerAction::Screenshot => {
                let Some(source) = self.registry.selected() else {
                    anyhow::bail!("no capture source selected");
                };
                let shot = self.effector.screenshot(&source, false).await?;
                debug!(bytes = shot.data.len(), "Trigger captured screenshot");
                Ok(())
            }
            TriggerAction::Script { command } => self.effector.run_script(command).await,
        }
    }
}

//! Test infrastructure: MockProvider, MockEffector, and TestHarness.
//!
//! Provides fully wired engine components with a scripted capability and a
//! recording effector, suitable for tests that exercise the real executor
//! loop without any network or real input devices.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::capture::{ScreenSource, ScreenSourceRegistry, SourceKind};
use crate::effector::SharedEffector;
use crate::plans::{
    BudgetTracker, ExecutionHistory, Plan, PlanExecutor, RecoveryAdvisor, StepRunner,
};
use crate::traits::{Effector, ModelProvider, Screenshot, ScrollDirection};

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// A recorded call to `MockProvider::generate()`.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub prompt: String,
    pub with_image: bool,
}

/// Mock capability that returns scripted responses, FIFO.
///
/// An exhausted script returns "ok" — convenient for tests whose steps never
/// consult the response content.
pub struct MockProvider {
    responses: Mutex<VecDeque<String>>,
    fail_next: AtomicBool,
    call_count: AtomicUsize,
    pub call_log: Mutex<Vec<MockCall>>,
}

impl MockProvider {
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fail_next: AtomicBool::new(false),
            call_count: AtomicUsize::new(0),
            call_log: Mutex::new(Vec::new()),
        }
    }

    /// Make the next generate() call fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of generate() calls so far.
    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn generate(&self, prompt: &str, image: Option<&Screenshot>) -> anyhow::Result<String> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.call_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockCall {
                prompt: prompt.to_string(),
                with_image: image.is_some(),
            });

        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("mock capability failure");
        }

        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        Ok(responses.pop_front().unwrap_or_else(|| "ok".to_string()))
    }
}

// ---------------------------------------------------------------------------
// MockEffector
// ---------------------------------------------------------------------------

/// Recording effector. Clones share state, so a test can keep one handle for
/// assertions while the engine drives another through [`SharedEffector`].
#[derive(Clone, Default)]
pub struct MockEffector {
    state: Arc<MockEffectorState>,
}

#[derive(Default)]
struct MockEffectorState {
    actions: Mutex<Vec<String>>,
    fail_ops: Mutex<HashSet<String>>,
}

impl MockEffector {
    /// Everything the effector was asked to do, in order.
    pub fn actions(&self) -> Vec<String> {
        self.state
            .actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Arm a one-shot failure for the named operation ("click", "type", ...).
    pub fn fail_next(&self, op: &str) {
        self.state
            .fail_ops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(op.to_string());
    }

    fn perform(&self, op: &str, entry: String) -> anyhow::Result<()> {
        let armed = self
            .state
            .fail_ops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(op);
        if armed {
            anyhow::bail!("mock {} failure", op);
        }
        self.state
            .actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
        Ok(())
    }
}

#[async_trait]
impl Effector for MockEffector {
    async fn sources(&self) -> anyhow::Result<Vec<ScreenSource>> {
        Ok(vec![ScreenSource {
            kind: SourceKind::Screen,
            id: "screen-1".to_string(),
            name: "Primary Display".to_string(),
        }])
    }

    async fn screenshot(
        &self,
        _source: &ScreenSource,
        _with_overlay: bool,
    ) -> anyhow::Result<Screenshot> {
        self.perform("screenshot", "screenshot".to_string())?;
        // PNG magic followed by nothing anyone will decode.
        Ok(Screenshot::new(vec![0x89, b'P', b'N', b'G']))
    }

    async fn click(&self, target: &str) -> anyhow::Result<()> {
        self.perform("click", format!("click:{}", target))
    }

    async fn type_text(&self, text: &str) -> anyhow::Result<()> {
        self.perform("type", format!("type:{}", text))
    }

    async fn scroll(&self, direction: ScrollDirection) -> anyhow::Result<()> {
        self.perform("scroll", format!("scroll:{:?}", direction).to_lowercase())
    }

    async fn open_url(&self, url: &str) -> anyhow::Result<()> {
        self.perform("open", format!("open:{}", url))
    }

    async fn notify(&self, title: &str, _message: &str) -> anyhow::Result<()> {
        self.perform("notify", format!("notify:{}", title))
    }

    async fn record_screen(&self, duration_ms: u64) -> anyhow::Result<()> {
        self.perform("record", format!("record:{}", duration_ms))
    }

    async fn run_script(&self, command: &str) -> anyhow::Result<()> {
        self.perform("script", format!("script:{}", command))
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

/// Engine components wired against the mocks, with a selected capture source
/// and a budget pre-seeded with the planning call (used = 1, max = 100).
pub struct TestHarness {
    pub provider: Arc<MockProvider>,
    pub effector: MockEffector,
    pub shared: SharedEffector,
    pub registry: Arc<ScreenSourceRegistry>,
    pub budget: Arc<BudgetTracker>,
    pub runner: StepRunner,
    pub advisor: RecoveryAdvisor,
    pub history: Arc<ExecutionHistory>,
}

/// Build a harness whose capability answers with `responses`, FIFO.
pub async fn harness(responses: Vec<String>) -> TestHarness {
    let provider = Arc::new(MockProvider::with_responses(responses));
    let effector = MockEffector::default();
    let shared = SharedEffector::new(Box::new(effector.clone()));

    let registry = Arc::new(ScreenSourceRegistry::new());
    registry
        .refresh(&shared)
        .await
        .expect("mock sources never fail");
    registry
        .select("screen-1")
        .expect("mock screen source exists");

    let budget = Arc::new(BudgetTracker::with_used(1, 100));
    let runner = StepRunner::new(
        provider.clone(),
        shared.clone(),
        registry.clone(),
        budget.clone(),
    );
    let advisor = RecoveryAdvisor::new(
        provider.clone(),
        shared.clone(),
        registry.clone(),
        budget.clone(),
    );
    let history = Arc::new(ExecutionHistory::new(10));

    TestHarness {
        provider,
        effector,
        shared,
        registry,
        budget,
        runner,
        advisor,
        history,
    }
}

/// Build an executor over the harness's provider/effector/history for `plan`.
/// The executor seeds its own budget from the plan's counters.
pub fn executor_with(h: &TestHarness, plan: Plan) -> PlanExecutor {
    PlanExecutor::new(
        plan,
        h.provider.clone(),
        h.shared.clone(),
        h.registry.clone(),
        h.history.clone(),
    )
}

//! Bounded in-memory archive of finished plans.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::Plan;
use crate::traits::HistorySink;

/// Default number of archived plans kept in memory.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Ring buffer of completed/aborted plans with best-effort persistence.
///
/// Eviction is oldest-first and enforced here, at the data-model level, not
/// by whatever backs the sink. Sink failures are logged and swallowed — the
/// caller tolerates loss of the persistent copy.
pub struct ExecutionHistory {
    entries: Mutex<VecDeque<Plan>>,
    capacity: usize,
    sink: Option<Arc<dyn HistorySink>>,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            sink: None,
        }
    }

    pub fn with_sink(capacity: usize, sink: Arc<dyn HistorySink>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            sink: Some(sink),
        }
    }

    /// Archive a finished plan (the executor passes a copy; the live object
    /// stays with its owner).
    pub async fn append(&self, plan: Plan) {
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if entries.len() >= self.capacity {
                if let Some(evicted) = entries.pop_front() {
                    debug!(plan_id = %evicted.id, "History full; evicting oldest plan");
                }
            }
            entries.push_back(plan.clone());
        }

        if let Some(ref sink) = self.sink {
            if let Err(e) = sink.append(&plan).await {
                warn!(plan_id = %plan.id, "History sink append failed (ignored): {}", e);
            }
        }
    }

    /// Newest-first view of up to `limit` archived plans.
    pub fn recent(&self, limit: usize) -> Vec<Plan> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::{PlanStatus, Step, StepAction};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn finished_plan(goal: &str) -> Plan {
        let mut plan = Plan::new(
            goal,
            vec![Step::new("analyze", StepAction::Analyze, 3)],
            5,
        );
        plan.status = PlanStatus::Completed;
        plan
    }

    #[tokio::test]
    async fn test_append_and_recent_ordering() {
        let history = ExecutionHistory::new(10);
        history.append(finished_plan("first")).await;
        history.append(finished_plan("second")).await;
        history.append(finished_plan("third")).await;

        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].goal, "third");
        assert_eq!(recent[1].goal, "second");
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_eviction_is_oldest_first() {
        let history = ExecutionHistory::new(2);
        history.append(finished_plan("a")).await;
        history.append(finished_plan("b")).await;
        history.append(finished_plan("c")).await;

        assert_eq!(history.len(), 2);
        let goals: Vec<String> = history.recent(10).into_iter().map(|p| p.goal).collect();
        assert_eq!(goals, vec!["c".to_string(), "b".to_string()]);
    }

    struct FailingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl HistorySink for FailingSink {
        async fn append(&self, _plan: &Plan) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("disk on fire")
        }

        async fn recent(&self, _limit: usize) -> anyhow::Result<Vec<Plan>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let sink = Arc::new(FailingSink {
            attempts: AtomicUsize::new(0),
        });
        let history = ExecutionHistory::with_sink(5, sink.clone());

        history.append(finished_plan("survives")).await;

        // In-memory copy kept despite the sink failing.
        assert_eq!(history.len(), 1);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
    }
}

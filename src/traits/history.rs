use async_trait::async_trait;

use crate::plans::Plan;

/// Best-effort persistence for finished plans.
///
/// Append is fire-and-record: the in-memory history logs and swallows sink
/// errors, so implementations may fail without affecting the engine.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn append(&self, plan: &Plan) -> anyhow::Result<()>;

    /// Most recent plans, newest first.
    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<Plan>>;
}

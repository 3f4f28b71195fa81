//! SQLite persistence for archived plans.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::info;

use super::Plan;
use crate::traits::HistorySink;

/// Durable backing for the execution history.
///
/// One row per finished plan, the full plan serialized into a JSON column so
/// the schema never chases the model. Best-effort by contract: callers go
/// through [`crate::plans::ExecutionHistory`], which logs and drops append
/// failures.
pub struct SqliteHistorySink {
    pool: SqlitePool,
}

impl SqliteHistorySink {
    /// Create the sink and run its migration.
    pub async fn new(pool: SqlitePool) -> anyhow::Result<Self> {
        let sink = Self { pool };
        sink.migrate().await?;
        Ok(sink)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plan_history (
                id TEXT PRIMARY KEY,
                goal TEXT NOT NULL,
                status TEXT NOT NULL,
                plan TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_plan_history_started_at ON plan_history(started_at)",
        )
        .execute(&self.pool)
        .await?;

        info!("Plan history table ready");
        Ok(())
    }
}

#[async_trait]
impl HistorySink for SqliteHistorySink {
    async fn append(&self, plan: &Plan) -> anyhow::Result<()> {
        let plan_json = serde_json::to_string(plan)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO plan_history (id, goal, status, plan, started_at, ended_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&plan.id)
        .bind(&plan.goal)
        .bind(plan.status.as_str())
        .bind(&plan_json)
        .bind(plan.started_at.to_rfc3339())
        .bind(plan.ended_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<Plan>> {
        let rows = sqlx::query(
            "SELECT plan FROM plan_history ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut plans = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.get("plan");
            plans.push(serde_json::from_str(&json)?);
        }
        Ok(plans)
    }
}

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use tracing::error;

use super::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(anyhow::anyhow!("Unknown run status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct WorkflowRunRow {
    run_id: String,
    workflow_id: String,
    event_id: String,
    status: String,
    output: Option<String>,
    error: Option<String>,
    attempts: i64,
}

/// Persisted state of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRun {
    pub run_id: String,
    pub workflow_id: String,
    pub event_id: String,
    pub status: RunStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub attempts: i64,
}

impl TryFrom<WorkflowRunRow> for WorkflowRun {
    type Error = anyhow::Error;

    fn try_from(row: WorkflowRunRow) -> Result<Self> {
        Ok(WorkflowRun {
            run_id: row.run_id,
            workflow_id: row.workflow_id,
            event_id: row.event_id,
            status: row.status.parse()?,
            output: row.output.as_deref().map(serde_json::from_str).transpose()?,
            error: row.error,
            attempts: row.attempts,
        })
    }
}

const RUN_COLUMNS: &str = "run_id, workflow_id, event_id, status, output, error, attempts";

impl WorkflowRun {
    /// Insert a new run, or reopen an existing one for another attempt.
    /// Completed runs keep their status and output.
    pub async fn begin(
        pool: &DbPool,
        run_id: &str,
        workflow_id: &str,
        event_id: &str,
    ) -> Result<WorkflowRun> {
        sqlx::query_as::<_, WorkflowRunRow>(&format!(
            r#"
            INSERT INTO workflow_runs (run_id, workflow_id, event_id, status, attempts)
            VALUES (?1, ?2, ?3, 'running', 1)
            ON CONFLICT(run_id) DO UPDATE SET
                attempts = attempts + 1,
                status = CASE WHEN status = 'completed' THEN status ELSE 'running' END,
                error = CASE WHEN status = 'completed' THEN error ELSE NULL END,
                updated_at = datetime('now')
            RETURNING {RUN_COLUMNS}
        "#
        ))
        .bind(run_id)
        .bind(workflow_id)
        .bind(event_id)
        .fetch_one(pool)
        .await
        .inspect_err(|e| error!("Failed to begin workflow run {}: {:?}", run_id, e))?
        .try_into()
    }

    pub async fn get(pool: &DbPool, run_id: &str) -> Result<Option<WorkflowRun>> {
        sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE run_id = ?1"
        ))
        .bind(run_id)
        .fetch_optional(pool)
        .await?
        .map(WorkflowRun::try_from)
        .transpose()
    }

    pub async fn complete(pool: &DbPool, run_id: &str, output: &Value) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = 'completed', output = ?1, error = NULL, updated_at = datetime('now')
            WHERE run_id = ?2
        "#,
        )
        .bind(serde_json::to_string(output)?)
        .bind(run_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn fail(pool: &DbPool, run_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = 'failed', error = ?1, updated_at = datetime('now')
            WHERE run_id = ?2
        "#,
        )
        .bind(error)
        .bind(run_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn load_step(pool: &DbPool, run_id: &str, step_name: &str) -> Result<Option<Value>> {
        let output = sqlx::query_scalar::<_, String>(
            "SELECT output FROM workflow_steps WHERE run_id = ?1 AND step_name = ?2",
        )
        .bind(run_id)
        .bind(step_name)
        .fetch_optional(pool)
        .await?;

        Ok(output.as_deref().map(serde_json::from_str).transpose()?)
    }

    /// Persist a step output. The first writer wins; the stored value is
    /// returned so that a concurrent duplicate continues with the same data.
    pub async fn save_step(
        pool: &DbPool,
        run_id: &str,
        step_name: &str,
        output: &Value,
    ) -> Result<Value> {
        sqlx::query(
            r#"
            INSERT INTO workflow_steps (run_id, step_name, output)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(run_id, step_name) DO NOTHING
        "#,
        )
        .bind(run_id)
        .bind(step_name)
        .bind(serde_json::to_string(output)?)
        .execute(pool)
        .await?;

        Self::load_step(pool, run_id, step_name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Step '{}' of run {} was not persisted", step_name, run_id))
    }

    /// Step names completed for a run, oldest first
    pub async fn completed_steps(pool: &DbPool, run_id: &str) -> Result<Vec<String>> {
        let steps = sqlx::query_scalar::<_, String>(
            "SELECT step_name FROM workflow_steps WHERE run_id = ?1 ORDER BY completed_at ASC, rowid ASC",
        )
        .bind(run_id)
        .fetch_all(pool)
        .await?;
        Ok(steps)
    }
}

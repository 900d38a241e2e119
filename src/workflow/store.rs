use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::database::{
    workflow_runs::{RunStatus, WorkflowRun},
    DbPool,
};

/// Persistence for run state and step outputs keyed by `(run id, step name)`.
#[async_trait]
pub trait StepStore: Send + Sync {
    /// Create the run or reopen it for another attempt. A completed run stays
    /// completed.
    async fn begin_run(&self, run_id: &str, workflow_id: &str, event_id: &str)
        -> Result<WorkflowRun>;

    async fn load_step(&self, run_id: &str, step_name: &str) -> Result<Option<Value>>;

    /// First writer wins; returns the output that is actually stored.
    async fn save_step(&self, run_id: &str, step_name: &str, output: &Value) -> Result<Value>;

    async fn complete_run(&self, run_id: &str, output: &Value) -> Result<()>;

    async fn fail_run(&self, run_id: &str, error: &str) -> Result<()>;

    async fn get_run(&self, run_id: &str) -> Result<Option<WorkflowRun>>;

    async fn completed_steps(&self, run_id: &str) -> Result<Vec<String>>;
}

#[derive(Clone)]
pub struct SqliteStepStore {
    db: DbPool,
}

impl SqliteStepStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StepStore for SqliteStepStore {
    async fn begin_run(
        &self,
        run_id: &str,
        workflow_id: &str,
        event_id: &str,
    ) -> Result<WorkflowRun> {
        WorkflowRun::begin(&self.db, run_id, workflow_id, event_id).await
    }

    async fn load_step(&self, run_id: &str, step_name: &str) -> Result<Option<Value>> {
        WorkflowRun::load_step(&self.db, run_id, step_name).await
    }

    async fn save_step(&self, run_id: &str, step_name: &str, output: &Value) -> Result<Value> {
        WorkflowRun::save_step(&self.db, run_id, step_name, output).await
    }

    async fn complete_run(&self, run_id: &str, output: &Value) -> Result<()> {
        WorkflowRun::complete(&self.db, run_id, output).await
    }

    async fn fail_run(&self, run_id: &str, error: &str) -> Result<()> {
        WorkflowRun::fail(&self.db, run_id, error).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<WorkflowRun>> {
        WorkflowRun::get(&self.db, run_id).await
    }

    async fn completed_steps(&self, run_id: &str) -> Result<Vec<String>> {
        WorkflowRun::completed_steps(&self.db, run_id).await
    }
}

/// Process-local store. Survives nothing; used where durability is not needed.
#[derive(Default)]
pub struct InMemoryStepStore {
    runs: DashMap<String, WorkflowRun>,
    steps: DashMap<String, Vec<(String, Value)>>,
}

impl InMemoryStepStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepStore for InMemoryStepStore {
    async fn begin_run(
        &self,
        run_id: &str,
        workflow_id: &str,
        event_id: &str,
    ) -> Result<WorkflowRun> {
        let mut run = self
            .runs
            .entry(run_id.to_string())
            .or_insert_with(|| WorkflowRun {
                run_id: run_id.to_string(),
                workflow_id: workflow_id.to_string(),
                event_id: event_id.to_string(),
                status: RunStatus::Running,
                output: None,
                error: None,
                attempts: 0,
            });
        run.attempts += 1;
        if run.status != RunStatus::Completed {
            run.status = RunStatus::Running;
            run.error = None;
        }
        Ok(run.clone())
    }

    async fn load_step(&self, run_id: &str, step_name: &str) -> Result<Option<Value>> {
        Ok(self.steps.get(run_id).and_then(|steps| {
            steps
                .iter()
                .find(|(name, _)| name == step_name)
                .map(|(_, output)| output.clone())
        }))
    }

    async fn save_step(&self, run_id: &str, step_name: &str, output: &Value) -> Result<Value> {
        let mut steps = self.steps.entry(run_id.to_string()).or_default();
        if let Some((_, existing)) = steps.iter().find(|(name, _)| name == step_name) {
            return Ok(existing.clone());
        }
        steps.push((step_name.to_string(), output.clone()));
        Ok(output.clone())
    }

    async fn complete_run(&self, run_id: &str, output: &Value) -> Result<()> {
        let mut run = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown run {}", run_id))?;
        run.status = RunStatus::Completed;
        run.output = Some(output.clone());
        run.error = None;
        Ok(())
    }

    async fn fail_run(&self, run_id: &str, error: &str) -> Result<()> {
        let mut run = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown run {}", run_id))?;
        run.status = RunStatus::Failed;
        run.error = Some(error.to_string());
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<WorkflowRun>> {
        Ok(self.runs.get(run_id).map(|run| run.clone()))
    }

    async fn completed_steps(&self, run_id: &str) -> Result<Vec<String>> {
        Ok(self
            .steps
            .get(run_id)
            .map(|steps| steps.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default())
    }
}

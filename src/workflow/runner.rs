use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{future::Future, sync::Arc};
use tracing::{debug, error, info, warn};

use super::{StepStore, Workflow, WorkflowError};
use crate::{database::workflow_runs::RunStatus, events::Event};

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: String,
    pub output: Value,
    /// Steps whose bodies ran during this invocation.
    pub executed_steps: Vec<String>,
    /// Steps whose persisted outputs were reused.
    pub reused_steps: Vec<String>,
    pub attempt: i64,
}

/// Executes workflows against a [`StepStore`], persisting each step output
/// before moving on.
#[derive(Clone)]
pub struct StepRunner {
    store: Arc<dyn StepStore>,
}

impl StepRunner {
    pub fn new(store: Arc<dyn StepStore>) -> Self {
        Self { store }
    }

    pub fn run_id(workflow_id: &str, event_id: &str) -> String {
        format!("{}:{}", workflow_id, event_id)
    }

    /// Run `workflow` for `event`. A run that already completed returns its
    /// stored output without executing anything.
    pub async fn run(
        &self,
        workflow: &dyn Workflow,
        event: &Event,
    ) -> Result<RunOutcome, WorkflowError> {
        let run_id = Self::run_id(workflow.id(), &event.id);
        let run = self
            .store
            .begin_run(&run_id, workflow.id(), &event.id)
            .await
            .map_err(WorkflowError::Store)?;

        if run.status == RunStatus::Completed {
            info!(run_id = %run_id, "Workflow run already completed, returning stored output");
            return Ok(RunOutcome {
                run_id,
                output: run.output.unwrap_or(Value::Null),
                executed_steps: Vec::new(),
                reused_steps: Vec::new(),
                attempt: run.attempts,
            });
        }

        info!(
            run_id = %run_id,
            workflow_id = %workflow.id(),
            event = %event.name,
            attempt = run.attempts,
            "Starting workflow run"
        );

        let mut context = StepContext::new(&run_id, workflow.steps(), self.store.as_ref());
        let result = workflow.execute(event, &mut context).await;
        let (executed_steps, reused_steps) = context.into_step_lists();

        match result {
            Ok(output) => {
                self.store
                    .complete_run(&run_id, &output)
                    .await
                    .map_err(WorkflowError::Store)?;
                info!(
                    run_id = %run_id,
                    executed = executed_steps.len(),
                    reused = reused_steps.len(),
                    "Workflow run completed"
                );
                Ok(RunOutcome {
                    run_id,
                    output,
                    executed_steps,
                    reused_steps,
                    attempt: run.attempts,
                })
            }
            Err(err) => {
                error!(run_id = %run_id, error = %err, "Workflow run failed");
                if let Err(store_err) = self.store.fail_run(&run_id, &err.to_string()).await {
                    warn!(run_id = %run_id, "Failed to record run failure: {:?}", store_err);
                }
                Err(err)
            }
        }
    }
}

/// Handle a workflow body uses to run its named steps.
pub struct StepContext<'a> {
    run_id: &'a str,
    declared: &'a [&'static str],
    store: &'a dyn StepStore,
    next_index: usize,
    executed: Vec<String>,
    reused: Vec<String>,
}

impl<'a> StepContext<'a> {
    fn new(run_id: &'a str, declared: &'a [&'static str], store: &'a dyn StepStore) -> Self {
        Self {
            run_id,
            declared,
            store,
            next_index: 0,
            executed: Vec::new(),
            reused: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        self.run_id
    }

    /// Run the step `name`, or return its persisted output if an earlier
    /// attempt already completed it. Steps must be invoked in declared order;
    /// a failing body stops the workflow and nothing is persisted for it.
    pub async fn run<T, F, Fut>(&mut self, name: &str, body: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, WorkflowError>> + Send,
    {
        let position = self
            .declared
            .iter()
            .position(|declared| *declared == name)
            .ok_or_else(|| WorkflowError::UndeclaredStep(name.to_string()))?;
        if position < self.next_index {
            return Err(WorkflowError::OutOfOrderStep(name.to_string()));
        }
        self.next_index = position + 1;

        let serialization = |source| WorkflowError::Serialization {
            step: name.to_string(),
            source,
        };

        if let Some(stored) = self
            .store
            .load_step(self.run_id, name)
            .await
            .map_err(WorkflowError::Store)?
        {
            debug!(run_id = %self.run_id, step = name, "Reusing persisted step output");
            self.reused.push(name.to_string());
            return serde_json::from_value(stored).map_err(serialization);
        }

        debug!(run_id = %self.run_id, step = name, "Executing step");
        let output = body().await?;
        let value = serde_json::to_value(&output).map_err(serialization)?;
        let persisted = self
            .store
            .save_step(self.run_id, name, &value)
            .await
            .map_err(WorkflowError::Store)?;
        self.executed.push(name.to_string());

        if persisted == value {
            Ok(output)
        } else {
            debug!(run_id = %self.run_id, step = name, "Concurrent attempt stored this step first");
            serde_json::from_value(persisted).map_err(serialization)
        }
    }

    fn into_step_lists(self) -> (Vec<String>, Vec<String>) {
        (self.executed, self.reused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::InMemoryStepStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const STEPS: &[&str] = &["first", "second", "third"];

    /// Counts body invocations and fails `second` while `fail_second` is set.
    #[derive(Default)]
    struct Counting {
        calls: [AtomicUsize; 3],
        fail_second: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Workflow for Counting {
        fn id(&self) -> &str {
            "counting"
        }

        fn trigger(&self) -> &str {
            "test/event"
        }

        fn steps(&self) -> &[&'static str] {
            STEPS
        }

        async fn execute(
            &self,
            _event: &Event,
            steps: &mut StepContext<'_>,
        ) -> Result<Value, WorkflowError> {
            let calls = &self.calls;
            let fail_second = &self.fail_second;

            let a: u32 = steps
                .run("first", move || async move {
                    calls[0].fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
                .await?;
            let b: u32 = steps
                .run("second", move || async move {
                    calls[1].fetch_add(1, Ordering::SeqCst);
                    if fail_second.load(Ordering::SeqCst) {
                        return Err(WorkflowError::step_failed("second", anyhow::anyhow!("flaky")));
                    }
                    Ok(2)
                })
                .await?;
            let c: u32 = steps
                .run("third", move || async move {
                    calls[2].fetch_add(1, Ordering::SeqCst);
                    Ok(3)
                })
                .await?;
            Ok(json!({ "sum": a + b + c }))
        }
    }

    impl Counting {
        fn counts(&self) -> [usize; 3] {
            [0, 1, 2].map(|i| self.calls[i].load(Ordering::SeqCst))
        }
    }

    fn event() -> Event {
        Event::new("test/event", &json!({})).unwrap()
    }

    #[tokio::test]
    async fn failed_step_stops_later_steps_and_resumes_on_retry() {
        let store = Arc::new(InMemoryStepStore::new());
        let runner = StepRunner::new(store.clone());
        let workflow = Counting::default();
        workflow.fail_second.store(true, Ordering::SeqCst);
        let event = event();

        let err = runner.run(&workflow, &event).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(workflow.counts(), [1, 1, 0]);

        let run_id = StepRunner::run_id("counting", &event.id);
        let run = store.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(store.completed_steps(&run_id).await.unwrap(), vec!["first"]);

        workflow.fail_second.store(false, Ordering::SeqCst);
        let outcome = runner.run(&workflow, &event).await.unwrap();
        assert_eq!(outcome.output, json!({ "sum": 6 }));
        assert_eq!(outcome.reused_steps, vec!["first"]);
        assert_eq!(outcome.executed_steps, vec!["second", "third"]);
        assert_eq!(outcome.attempt, 2);
        assert_eq!(workflow.counts(), [1, 2, 1]);
    }

    #[tokio::test]
    async fn completed_run_is_not_executed_again() {
        let store = Arc::new(InMemoryStepStore::new());
        let runner = StepRunner::new(store);
        let workflow = Counting::default();
        let event = event();

        let first = runner.run(&workflow, &event).await.unwrap();
        let second = runner.run(&workflow, &event).await.unwrap();

        assert_eq!(first.output, second.output);
        assert!(second.executed_steps.is_empty());
        assert_eq!(workflow.counts(), [1, 1, 1]);
    }

    struct Misbehaving(&'static [&'static str]);

    #[async_trait]
    impl Workflow for Misbehaving {
        fn id(&self) -> &str {
            "misbehaving"
        }

        fn trigger(&self) -> &str {
            "test/event"
        }

        fn steps(&self) -> &[&'static str] {
            STEPS
        }

        async fn execute(
            &self,
            _event: &Event,
            steps: &mut StepContext<'_>,
        ) -> Result<Value, WorkflowError> {
            for name in self.0 {
                let _: u32 = steps.run(name, || async { Ok(0) }).await?;
            }
            Ok(Value::Null)
        }
    }

    struct EchoRunId;

    #[async_trait]
    impl Workflow for EchoRunId {
        fn id(&self) -> &str {
            "echo"
        }

        fn trigger(&self) -> &str {
            "test/event"
        }

        fn steps(&self) -> &[&'static str] {
            &[]
        }

        async fn execute(
            &self,
            _event: &Event,
            steps: &mut StepContext<'_>,
        ) -> Result<Value, WorkflowError> {
            Ok(json!(steps.run_id()))
        }
    }

    #[tokio::test]
    async fn step_context_exposes_the_run_id() {
        let runner = StepRunner::new(Arc::new(InMemoryStepStore::new()));
        let event = event();
        let outcome = runner.run(&EchoRunId, &event).await.unwrap();

        let expected = format!("echo:{}", event.id);
        assert_eq!(outcome.run_id, expected);
        assert_eq!(outcome.output, json!(expected));
    }

    #[tokio::test]
    async fn undeclared_step_is_rejected() {
        let runner = StepRunner::new(Arc::new(InMemoryStepStore::new()));
        let err = runner
            .run(&Misbehaving(&["first", "bonus"]), &event())
            .await
            .unwrap_err();
        assert!(matches!(&err, WorkflowError::UndeclaredStep(name) if name == "bonus"));
    }

    #[tokio::test]
    async fn steps_must_follow_declared_order() {
        let runner = StepRunner::new(Arc::new(InMemoryStepStore::new()));
        let err = runner
            .run(&Misbehaving(&["second", "first"]), &event())
            .await
            .unwrap_err();
        assert!(matches!(&err, WorkflowError::OutOfOrderStep(name) if name == "first"));
        assert!(!err.is_retryable());
    }
}

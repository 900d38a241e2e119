//! Durable, step-based workflows triggered by events.
//!
//! A [`Workflow`] declares an ordered list of step names and runs its body
//! through a [`StepContext`]. Each step output is persisted under
//! `(run id, step name)` before the next step starts, so a redelivered event
//! resumes at the first step that has not completed yet.

pub mod enrichment;
pub mod registry;
pub mod runner;
pub mod store;

use async_trait::async_trait;
use serde_json::Value;

use crate::events::Event;

pub use enrichment::{EnrichmentResult, TicketEnrichmentWorkflow};
pub use registry::WorkflowRegistry;
pub use runner::{RunOutcome, StepContext, StepRunner};
pub use store::{InMemoryStepStore, SqliteStepStore, StepStore};

#[async_trait]
pub trait Workflow: Send + Sync {
    /// Stable identifier, part of every run id.
    fn id(&self) -> &str;

    /// Name of the event that starts this workflow.
    fn trigger(&self) -> &str;

    /// Step names in execution order.
    fn steps(&self) -> &[&'static str];

    async fn execute(&self, event: &Event, steps: &mut StepContext<'_>)
        -> Result<Value, WorkflowError>;
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    #[error("Invalid payload for event '{event}': {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Step '{0}' is not declared by this workflow")]
    UndeclaredStep(String),

    #[error("Step '{0}' invoked out of declared order")]
    OutOfOrderStep(String),

    #[error("Step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Output of step '{step}' could not be (de)serialized: {source}")]
    Serialization {
        step: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Step store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl WorkflowError {
    /// Whether redelivering the triggering event may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::StepFailed { .. } | WorkflowError::Store(_)
        )
    }

    pub fn step_failed(step: &str, source: anyhow::Error) -> Self {
        WorkflowError::StepFailed {
            step: step.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ticket_is_terminal() {
        assert!(!WorkflowError::TicketNotFound("t".into()).is_retryable());
        assert!(!WorkflowError::UndeclaredStep("x".into()).is_retryable());
    }

    #[test]
    fn infrastructure_failures_are_retryable() {
        assert!(WorkflowError::step_failed("load-ticket", anyhow::anyhow!("db busy")).is_retryable());
        assert!(WorkflowError::Store(anyhow::anyhow!("disk full")).is_retryable());
    }
}

use anyhow::Result;
use std::{collections::HashMap, sync::Arc};
use tracing::info;

use super::Workflow;

/// Workflows keyed by the event name that triggers them. Built once at
/// startup and handed to the dispatcher.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    by_trigger: HashMap<String, Vec<Arc<dyn Workflow>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow. Workflow ids must be unique across the registry
    /// because they prefix run ids.
    pub fn register(&mut self, workflow: Arc<dyn Workflow>) -> Result<&mut Self> {
        let duplicate = self
            .by_trigger
            .values()
            .flatten()
            .any(|existing| existing.id() == workflow.id());
        if duplicate {
            anyhow::bail!("Workflow '{}' is already registered", workflow.id());
        }

        info!(
            workflow_id = %workflow.id(),
            trigger = %workflow.trigger(),
            "Registered workflow"
        );
        self.by_trigger
            .entry(workflow.trigger().to_string())
            .or_default()
            .push(workflow);
        Ok(self)
    }

    pub fn workflows_for(&self, event_name: &str) -> &[Arc<dyn Workflow>] {
        self.by_trigger
            .get(event_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_trigger.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

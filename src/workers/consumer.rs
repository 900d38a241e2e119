use std::{sync::Arc, time::Duration};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::{
    config::DispatcherConfig,
    database::{events::EventRecord, workflow_runs::RunStatus, DbPool},
    events::dispatcher::{Delivery, RunReport},
    workflow::{StepRunner, WorkflowRegistry},
};

/// Drains the dispatcher queue and runs every workflow registered for each
/// event. Runs for different deliveries proceed concurrently, bounded by
/// `max_concurrent_runs`.
pub struct WorkflowConsumer {
    db: DbPool,
    registry: WorkflowRegistry,
    runner: StepRunner,
    config: DispatcherConfig,
    redelivery: mpsc::WeakSender<Delivery>,
    reports: broadcast::Sender<RunReport>,
    permits: Arc<Semaphore>,
}

impl WorkflowConsumer {
    pub fn new(
        db: DbPool,
        registry: WorkflowRegistry,
        runner: StepRunner,
        config: DispatcherConfig,
        redelivery: mpsc::WeakSender<Delivery>,
        reports: broadcast::Sender<RunReport>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_runs.max(1)));
        Self {
            db,
            registry,
            runner,
            config,
            redelivery,
            reports,
            permits,
        }
    }

    /// Runs until every dispatcher handle is dropped.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<Delivery>) {
        info!("Starting workflow consumer");

        while let Some(delivery) = receiver.recv().await {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let consumer = Arc::clone(&self);
            tokio::spawn(async move {
                consumer.process_delivery(delivery).await;
                drop(permit);
            });
        }

        warn!("Workflow consumer loop ended");
    }

    async fn process_delivery(&self, delivery: Delivery) {
        let event = &delivery.event;
        debug!(
            event_id = %event.id,
            event = %event.name,
            attempt = delivery.attempt,
            "Processing delivery"
        );

        if let Err(e) = EventRecord::record_attempt(&self.db, &event.id).await {
            warn!(event_id = %event.id, error = %e, "Failed to record delivery attempt");
        }

        let workflows = self.registry.workflows_for(&event.name);
        if workflows.is_empty() {
            warn!(event = %event.name, event_id = %event.id, "No workflows registered for event");
            self.resolve(&event.id, "no workflows registered").await;
            return;
        }

        let may_retry = delivery.attempt < self.config.max_delivery_attempts;
        let mut retry = false;
        let mut failures = Vec::new();
        let mut reports = Vec::with_capacity(workflows.len());

        for workflow in workflows {
            let run_id = StepRunner::run_id(workflow.id(), &event.id);
            let report = match self.runner.run(workflow.as_ref(), event).await {
                Ok(outcome) => RunReport {
                    event_id: event.id.clone(),
                    event_name: event.name.clone(),
                    workflow_id: workflow.id().to_string(),
                    run_id: outcome.run_id,
                    attempt: delivery.attempt,
                    status: RunStatus::Completed,
                    error: None,
                    will_retry: false,
                },
                Err(err) => {
                    let will_retry = may_retry && err.is_retryable();
                    if will_retry {
                        warn!(run_id = %run_id, attempt = delivery.attempt, error = %err, "Workflow run failed, will redeliver");
                    } else {
                        error!(run_id = %run_id, attempt = delivery.attempt, error = %err, "Workflow run failed permanently");
                    }
                    retry |= will_retry;
                    failures.push(format!("{}: {}", workflow.id(), err));
                    RunReport {
                        event_id: event.id.clone(),
                        event_name: event.name.clone(),
                        workflow_id: workflow.id().to_string(),
                        run_id,
                        attempt: delivery.attempt,
                        status: RunStatus::Failed,
                        error: Some(err.to_string()),
                        will_retry,
                    }
                }
            };
            reports.push(report);
        }

        // Settle the event before announcing outcomes.
        if retry {
            self.schedule_redelivery(delivery.clone());
        } else {
            let summary = if failures.is_empty() {
                "completed".to_string()
            } else {
                format!("failed: {}", failures.join("; "))
            };
            self.resolve(&event.id, &summary).await;
        }

        for report in reports {
            self.report(report);
        }
    }

    /// Requeue after a linear backoff. Completed runs short-circuit on the
    /// next delivery, so only failed workflows do work again.
    fn schedule_redelivery(&self, delivery: Delivery) {
        let Some(sender) = self.redelivery.upgrade() else {
            warn!(event_id = %delivery.event.id, "Dispatcher is shut down, event stays pending");
            return;
        };
        let backoff = redelivery_backoff(self.config.redelivery_backoff, delivery.attempt);
        let next = Delivery {
            event: delivery.event,
            attempt: delivery.attempt + 1,
        };

        debug!(event_id = %next.event.id, attempt = next.attempt, ?backoff, "Scheduling redelivery");
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if sender.send(next).await.is_err() {
                warn!("Dispatcher closed before redelivery");
            }
        });
    }

    async fn resolve(&self, event_id: &str, summary: &str) {
        if let Err(e) = EventRecord::resolve(&self.db, event_id, summary).await {
            error!(event_id = %event_id, error = %e, "Failed to mark event processed");
        }
    }

    fn report(&self, report: RunReport) {
        if let Err(e) = self.reports.send(report) {
            debug!("Run report not delivered: {}", e);
        }
    }
}

/// Linear backoff, saturating at `Duration::MAX`.
fn redelivery_backoff(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(attempt).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly_with_attempt() {
        let base = Duration::from_millis(500);
        assert_eq!(redelivery_backoff(base, 1), Duration::from_millis(500));
        assert_eq!(redelivery_backoff(base, 3), Duration::from_millis(1500));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let huge = Duration::from_secs(u64::MAX / 2 + 1);
        assert_eq!(redelivery_backoff(huge, 2), Duration::MAX);
        assert_eq!(redelivery_backoff(Duration::MAX, u32::MAX), Duration::MAX);
    }
}

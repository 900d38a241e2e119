use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::Event;
use crate::{
    config::DispatcherConfig,
    database::{events::EventRecord, workflow_runs::RunStatus, DbPool},
    workers::consumer::WorkflowConsumer,
    workflow::{StepRunner, WorkflowRegistry},
};

const REPORT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to persist event: {0}")]
    Persist(#[source] anyhow::Error),

    #[error("Event dispatcher is shut down")]
    Closed,
}

/// One delivery of an event to its workflows. `attempt` starts at 1.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event: Event,
    pub attempt: u32,
}

/// Outcome of one workflow run for one delivery.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub event_id: String,
    pub event_name: String,
    pub workflow_id: String,
    pub run_id: String,
    pub attempt: u32,
    pub status: RunStatus,
    pub error: Option<String>,
    /// Whether the event will be delivered again.
    pub will_retry: bool,
}

/// Persists published events and hands them to the workflow consumer.
///
/// Events are stored before they are queued, so anything that was accepted
/// but not yet resolved can be redelivered with [`EventDispatcher::redeliver_pending`].
#[derive(Clone)]
pub struct EventDispatcher {
    db: DbPool,
    sender: mpsc::Sender<Delivery>,
    reports: broadcast::Sender<RunReport>,
}

impl EventDispatcher {
    /// Spawn the consumer loop and return a handle for publishing.
    pub fn start(
        db: DbPool,
        registry: WorkflowRegistry,
        runner: StepRunner,
        config: DispatcherConfig,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);

        info!(
            workflows = registry.len(),
            max_concurrent_runs = config.max_concurrent_runs,
            max_delivery_attempts = config.max_delivery_attempts,
            "Starting event dispatcher"
        );

        let consumer = Arc::new(WorkflowConsumer::new(
            db.clone(),
            registry,
            runner,
            config,
            sender.downgrade(),
            reports.clone(),
        ));
        let handle = tokio::spawn(consumer.run(receiver));

        (
            Self {
                db,
                sender,
                reports,
            },
            handle,
        )
    }

    /// Persist and queue an event. Returns once the event is queued, not
    /// when its workflows finish.
    pub async fn publish(&self, event: Event) -> Result<(), DispatchError> {
        EventRecord::create(&self.db, &event)
            .await
            .map_err(DispatchError::Persist)?;

        debug!(event_id = %event.id, event = %event.name, "Queueing event");
        self.sender
            .send(Delivery { event, attempt: 1 })
            .await
            .map_err(|_| DispatchError::Closed)
    }

    /// Publish in the background. Failures go to `on_error` and never reach
    /// the caller.
    pub fn publish_detached<F>(&self, event: Event, on_error: F)
    where
        F: FnOnce(&Event, DispatchError) + Send + 'static,
    {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let snapshot = event.clone();
            if let Err(e) = dispatcher.publish(event).await {
                on_error(&snapshot, e);
            }
        });
    }

    /// Receive a [`RunReport`] for every workflow run finished from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunReport> {
        self.reports.subscribe()
    }

    /// Queue every stored event that was never resolved, e.g. after a crash.
    pub async fn redeliver_pending(&self) -> anyhow::Result<usize> {
        let pending = EventRecord::get_unprocessed(&self.db).await?;
        let mut queued = 0;

        for record in pending {
            let event_id = record.id.clone();
            let attempt = u32::try_from(record.attempts).unwrap_or(0).saturating_add(1);
            let event = match record.into_event() {
                Ok(event) => event,
                Err(e) => {
                    warn!(event_id = %event_id, "Stored event has an undecodable payload: {}", e);
                    EventRecord::resolve(&self.db, &event_id, "failed: undecodable payload").await?;
                    continue;
                }
            };

            self.sender
                .send(Delivery { event, attempt })
                .await
                .map_err(|_| DispatchError::Closed)?;
            queued += 1;
        }

        if queued > 0 {
            info!("Redelivered {} pending event(s)", queued);
        }
        Ok(queued)
    }
}

//! Bounded hand-off between the gateway and the executor.

use chrono::Utc;
use orderdesk_core::event::{DomainEvent, EventBus};
use orderdesk_core::request::{EVENT_NAME, QueryEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::registry::JobRegistry;

pub type JobId = String;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue is full")]
    Full,

    #[error("Job queue is closed")]
    Closed,
}

/// Submitting half. Cheap to clone; every clone feeds the same executor.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<QueryEvent>,
    registry: Option<Arc<JobRegistry>>,
    event_bus: Option<Arc<EventBus>>,
}

/// Consuming half, owned by the executor's dispatcher.
pub struct JobReceiver {
    receiver: mpsc::Receiver<QueryEvent>,
}

impl JobQueue {
    pub fn bounded(capacity: usize) -> (JobQueue, JobReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            JobQueue {
                sender,
                registry: None,
                event_bus: None,
            },
            JobReceiver { receiver },
        )
    }

    pub fn with_registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Enqueue without waiting. The job runs later on an executor worker.
    pub async fn submit(&self, event: QueryEvent) -> Result<JobId, QueueError> {
        let job_id = event.id.clone();
        if let Some(registry) = &self.registry {
            registry.queued(&event).await;
        }

        match self.sender.try_send(event) {
            Ok(()) => {
                debug!(job_id = %job_id, event = EVENT_NAME, "Job queued");
                if let Some(bus) = &self.event_bus {
                    bus.publish(DomainEvent::JobQueued {
                        job_id: job_id.clone(),
                        timestamp: Utc::now(),
                    });
                }
                Ok(job_id)
            }
            Err(e) => {
                if let Some(registry) = &self.registry {
                    registry.remove(&job_id).await;
                }
                match e {
                    TrySendError::Full(_) => {
                        warn!(job_id = %job_id, "Job queue full, refusing submission");
                        Err(QueueError::Full)
                    }
                    TrySendError::Closed(_) => Err(QueueError::Closed),
                }
            }
        }
    }

    /// Free slots left.
    pub fn remaining_capacity(&self) -> usize {
        self.sender.capacity()
    }
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<QueryEvent> {
        self.receiver.recv().await
    }

    pub fn close(&mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JobStatus;
    use orderdesk_core::request::SubmitQuery;

    fn event(question: &str) -> QueryEvent {
        SubmitQuery::new(question).validate().unwrap()
    }

    #[tokio::test]
    async fn submit_returns_the_event_id() {
        let registry = Arc::new(JobRegistry::new());
        let (queue, mut receiver) = JobQueue::bounded(4);
        let queue = queue.with_registry(registry.clone());

        let ev = event("Where is my order?");
        let id = queue.submit(ev.clone()).await.unwrap();
        assert_eq!(id, ev.id);
        assert_eq!(registry.get(&id).await.unwrap().status, JobStatus::Queued);
        assert_eq!(receiver.recv().await.unwrap(), ev);
    }

    #[tokio::test]
    async fn full_queue_refuses_and_forgets_the_job() {
        let registry = Arc::new(JobRegistry::new());
        let (queue, _receiver) = JobQueue::bounded(1);
        let queue = queue.with_registry(registry.clone());

        queue.submit(event("first")).await.unwrap();
        let rejected = event("second");
        assert_eq!(queue.submit(rejected.clone()).await, Err(QueueError::Full));
        assert!(registry.get(&rejected.id).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (queue, receiver) = JobQueue::bounded(1);
        drop(receiver);
        assert_eq!(queue.submit(event("anyone there?")).await, Err(QueueError::Closed));
    }
}

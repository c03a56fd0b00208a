//! Consumes queued questions and streams agent answers to the broker.
//!
//! Each job runs on its own task. The agent call is a single checkpointed
//! step: a transient failure reruns the whole step from an empty message
//! with the same id, and a redelivered event whose step already succeeded
//! is not executed again.

use chrono::Utc;
use orderdesk_agent::{AgentLoop, AgentOutcome, SnapshotSink, user_prompt};
use orderdesk_core::event::{DomainEvent, EventBus};
use orderdesk_core::message::Message;
use orderdesk_core::request::QueryEvent;
use orderdesk_realtime::ChannelBroker;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::queue::JobReceiver;
use crate::registry::{JobRegistry, JobStatus};
use crate::step::{CheckpointStore, RetryPolicy, StepRunner};

/// Name of the step wrapping the agent run.
pub const CALL_MODEL_STEP: &str = "call-model";

/// Checkpointed result of [`CALL_MODEL_STEP`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallModelResult {
    pub message: Message,
    pub steps: usize,
    pub finished: bool,
}

impl From<AgentOutcome> for CallModelResult {
    fn from(outcome: AgentOutcome) -> Self {
        Self {
            message: outcome.message,
            steps: outcome.steps,
            finished: outcome.finished,
        }
    }
}

/// Publishes every snapshot to one broker topic.
pub struct BrokerSink {
    broker: Arc<ChannelBroker>,
    channel: String,
    topic: String,
}

impl BrokerSink {
    pub fn new(broker: Arc<ChannelBroker>, channel: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            channel: channel.into(),
            topic: topic.into(),
        }
    }
}

impl SnapshotSink for BrokerSink {
    fn emit(&self, message: &Message) {
        let delivered = self.broker.publish(&self.channel, &self.topic, message.clone().into());
        debug!(message_id = %message.id, parts = message.parts.len(), delivered, "Snapshot published");
    }
}

pub struct JobExecutor {
    agent: Arc<AgentLoop>,
    broker: Arc<ChannelBroker>,
    registry: Arc<JobRegistry>,
    runner: StepRunner,
    channel: String,
    topic: String,
    event_bus: Option<Arc<EventBus>>,
}

impl JobExecutor {
    pub fn new(
        agent: Arc<AgentLoop>,
        broker: Arc<ChannelBroker>,
        registry: Arc<JobRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            agent,
            broker,
            registry,
            runner: StepRunner::new(Arc::new(CheckpointStore::new()), policy),
            channel: "ai".into(),
            topic: "ai".into(),
            event_bus: None,
        }
    }

    /// Publish snapshots to `topic` on `channel` instead of `ai`/`ai`.
    pub fn with_target(mut self, channel: impl Into<String>, topic: impl Into<String>) -> Self {
        self.channel = channel.into();
        self.topic = topic.into();
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<CheckpointStore>) -> Self {
        let policy = *self.runner.policy();
        self.runner = StepRunner::new(checkpoints, policy);
        if let Some(bus) = &self.event_bus {
            self.runner = self.runner.with_event_bus(bus.clone());
        }
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        let policy = *self.runner.policy();
        self.runner = StepRunner::new(self.runner.checkpoints().clone(), policy).with_event_bus(bus.clone());
        self.event_bus = Some(bus);
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Drain `receiver`, running at most `workers` jobs at once.
    ///
    /// The returned task ends once every [`JobQueue`](crate::JobQueue) clone
    /// is dropped; jobs already started run to completion.
    pub fn spawn(self: Arc<Self>, mut receiver: JobReceiver, workers: usize) -> JoinHandle<()> {
        let workers = workers.max(1);
        let permits = Arc::new(Semaphore::new(workers));
        info!(workers, "Job executor started");

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let executor = self.clone();
                tokio::spawn(async move {
                    executor.run_job(event).await;
                    drop(permit);
                });
            }
            info!("Job queue closed, executor stopping");
        })
    }

    /// Run one job to completion. Never returns an error; failures are
    /// recorded in the registry and logged.
    pub async fn run_job(&self, event: QueryEvent) -> JobStatus {
        let job_id = event.id.as_str();
        let started = Instant::now();
        self.registry.started(&event).await;
        self.publish_event(DomainEvent::JobStarted {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        });
        info!(job_id, user_id = %event.user_id, session_id = %event.session_id, "Job started");

        let prompt = user_prompt(&event.question, event.order_id.as_deref());
        let prompt = prompt.as_str();
        let result = self
            .runner
            .run(job_id, CALL_MODEL_STEP, |attempt| {
                let sink = BrokerSink::new(self.broker.clone(), &self.channel, &self.topic);
                async move {
                    self.registry.attempt(job_id).await;
                    debug!(job_id, attempt, "Calling agent");
                    self.agent
                        .run(prompt, job_id, &sink)
                        .await
                        .map(CallModelResult::from)
                }
            })
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(outcome) => {
                self.registry.completed(job_id).await;
                info!(
                    job_id,
                    steps = outcome.steps,
                    finished = outcome.finished,
                    parts = outcome.message.parts.len(),
                    duration_ms,
                    "Job completed"
                );
                self.publish_event(DomainEvent::JobCompleted {
                    job_id: job_id.to_string(),
                    steps: outcome.steps,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                JobStatus::Completed
            }
            Err(e) => {
                self.registry.failed(job_id, e.source.to_string()).await;
                error!(job_id, attempts = e.attempts, duration_ms, "Job failed: {e}");
                self.publish_event(DomainEvent::JobFailed {
                    job_id: job_id.to_string(),
                    attempts: e.attempts,
                    error_message: e.source.to_string(),
                    timestamp: Utc::now(),
                });
                JobStatus::Failed
            }
        }
    }

    fn publish_event(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

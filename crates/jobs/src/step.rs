//! Durable steps: memoized results plus retry with exponential backoff.
//!
//! A step is identified by `(job_id, step_name)`. Once it succeeds its
//! serialized result is checkpointed and every later run of the same step
//! returns that result without executing again. Failures are retried only
//! when [`orderdesk_core::Error::is_transient`] says so.

use chrono::Utc;
use orderdesk_config::ExecutorConfig;
use orderdesk_core::error::{Error, ProviderError};
use orderdesk_core::event::{DomainEvent, EventBus};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Jobs whose checkpoints are retained.
pub const DEFAULT_CHECKPOINT_JOBS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before attempt `failed_attempt + 1`: doubles each time, capped.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }

    /// Delay after `error` ended attempt `failed_attempt`. A rate limit's
    /// `retry-after` is honoured even when it exceeds the backoff cap.
    pub fn delay_for(&self, failed_attempt: u32, error: &Error) -> Duration {
        let backoff = self.backoff(failed_attempt);
        match error {
            Error::Provider(ProviderError::RateLimited { retry_after_secs }) => {
                backoff.max(Duration::from_secs(*retry_after_secs))
            }
            _ => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutorConfig::default())
    }
}

/// Completed step results keyed by job and step name.
pub struct CheckpointStore {
    inner: RwLock<Checkpoints>,
    max_jobs: usize,
}

#[derive(Default)]
struct Checkpoints {
    steps: HashMap<String, HashMap<String, serde_json::Value>>,
    order: VecDeque<String>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHECKPOINT_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            inner: RwLock::new(Checkpoints::default()),
            max_jobs: max_jobs.max(1),
        }
    }

    pub async fn get(&self, job_id: &str, step: &str) -> Option<serde_json::Value> {
        let inner = self.inner.read().await;
        inner.steps.get(job_id).and_then(|steps| steps.get(step)).cloned()
    }

    pub async fn record(&self, job_id: &str, step: &str, value: serde_json::Value) {
        let mut inner = self.inner.write().await;
        if !inner.steps.contains_key(job_id) {
            if inner.order.len() >= self.max_jobs
                && let Some(oldest) = inner.order.pop_front()
            {
                inner.steps.remove(&oldest);
            }
            inner.order.push_back(job_id.to_string());
        }
        inner
            .steps
            .entry(job_id.to_string())
            .or_default()
            .insert(step.to_string(), value);
    }

    pub async fn contains(&self, job_id: &str, step: &str) -> bool {
        self.get(job_id, step).await.is_some()
    }
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A step that gave up.
#[derive(Debug, thiserror::Error)]
#[error("Step '{step}' failed after {attempts} attempt(s): {source}")]
pub struct StepError {
    pub step: String,
    pub attempts: u32,
    #[source]
    pub source: orderdesk_core::Error,
}

/// Runs named steps against a [`CheckpointStore`] under a [`RetryPolicy`].
pub struct StepRunner {
    checkpoints: Arc<CheckpointStore>,
    policy: RetryPolicy,
    event_bus: Option<Arc<EventBus>>,
}

impl StepRunner {
    pub fn new(checkpoints: Arc<CheckpointStore>, policy: RetryPolicy) -> Self {
        Self {
            checkpoints,
            policy,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    /// Run `step` for `job_id`, or replay its checkpoint if it already succeeded.
    ///
    /// `body` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, job_id: &str, step: &str, mut body: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = orderdesk_core::Result<T>>,
    {
        if let Some(saved) = self.checkpoints.get(job_id, step).await {
            match serde_json::from_value(saved) {
                Ok(value) => {
                    debug!(job_id, step, "Step already completed, replaying checkpoint");
                    return Ok(value);
                }
                Err(e) => warn!(job_id, step, "Discarding unreadable checkpoint: {e}"),
            }
        }

        let mut attempt = 1;
        loop {
            match body(attempt).await {
                Ok(value) => {
                    let saved = serde_json::to_value(&value).map_err(|e| StepError {
                        step: step.to_string(),
                        attempts: attempt,
                        source: e.into(),
                    })?;
                    self.checkpoints.record(job_id, step, saved).await;
                    debug!(job_id, step, attempt, "Step checkpointed");
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt, &e);
                    warn!(
                        job_id,
                        step,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient step failure, retrying: {e}"
                    );
                    if let Some(bus) = &self.event_bus {
                        bus.publish(DomainEvent::StepRetrying {
                            job_id: job_id.to_string(),
                            step: step.to_string(),
                            attempt,
                            error_message: e.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(StepError {
                        step: step.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}

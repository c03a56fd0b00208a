//! # orderdesk jobs
//!
//! Fire-and-forget execution of customer questions.
//!
//! The gateway hands a validated [`QueryEvent`](orderdesk_core::QueryEvent)
//! to a [`JobQueue`]; the [`JobExecutor`] picks it up on a worker, runs the
//! agent inside one checkpointed step, and publishes every message snapshot
//! to the channel broker. Outcomes land in the [`JobRegistry`] and on the
//! event bus, never back at the submitter.

pub mod executor;
pub mod queue;
pub mod registry;
pub mod step;

pub use executor::{BrokerSink, CALL_MODEL_STEP, CallModelResult, JobExecutor};
pub use queue::{JobId, JobQueue, JobReceiver, QueueError};
pub use registry::{JobRecord, JobRegistry, JobStatus};
pub use step::{CheckpointStore, RetryPolicy, StepError, StepRunner};

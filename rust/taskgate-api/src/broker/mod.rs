//! The broker contract - the durable queue/execution substrate.
//!
//! All mutable job state lives behind this trait. The gateway only ever
//! asks the broker to record a state change and returns as soon as the
//! broker acknowledges it; it never waits for job execution.

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryBroker;
pub use self::redis::RedisBroker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cronspec::CronSpec;
use crate::registry::ExecPolicy;

/// One concrete submission handed to the broker.
///
/// Carries everything the worker needs: the task identity, the handler
/// path to invoke, the target queue, the caller's kwargs, and the task's
/// declared execution policy, forwarded unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Registered task name.
    pub task: String,
    /// Qualified handler path the worker invokes.
    pub handler: String,
    /// Target queue name.
    pub queue: String,
    /// Keyword arguments for the handler.
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    /// Registration-time execution policy.
    pub policy: ExecPolicy,
}

/// Lifecycle state of a job as the broker sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Scheduled,
    Running,
    Finished,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A broker-side view of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    /// Opaque job identifier.
    pub id: String,
    /// Task name the job was dispatched for.
    pub task: String,
    /// Queue the job is attached to.
    pub queue: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// When the job is due, for scheduled jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Broker-layer failures.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker cannot be reached.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// The broker answered with something the gateway cannot interpret.
    #[error("broker protocol error: {0}")]
    Protocol(String),
}

impl From<::redis::RedisError> for BrokerError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_io_error() || err.is_timeout() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Protocol(err.to_string())
        }
    }
}

/// The durable queue/execution substrate.
///
/// Implementations must be safe for concurrent use by many in-flight
/// dispatch and cancel operations.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a job for immediate execution; returns its id.
    async fn enqueue(&self, job: JobSpec) -> Result<String, BrokerError>;

    /// Register a job to be enqueued at `at`; returns its id.
    async fn enqueue_at(&self, at: DateTime<Utc>, job: JobSpec) -> Result<String, BrokerError>;

    /// Register a recurring schedule; the broker materializes concrete
    /// run instances from it. Returns the schedule id.
    async fn schedule_cron(&self, spec: &CronSpec, job: JobSpec) -> Result<String, BrokerError>;

    /// Fetch the current state of a job, if the broker knows it.
    async fn fetch_job(&self, id: &str) -> Result<Option<JobState>, BrokerError>;

    /// Signal the worker owning `id` to abort it. `Ok(true)` iff the job
    /// was found running.
    async fn abort_running(&self, id: &str) -> Result<bool, BrokerError>;

    /// Remove `id` from the scheduled-future registry (plain or cron),
    /// deleting its persisted record. `Ok(true)` iff it was scheduled.
    async fn remove_scheduled(&self, id: &str) -> Result<bool, BrokerError>;

    /// Cancel a queued, not-yet-started job. When `enqueue_dependents`
    /// is set, jobs depending on `id` are released to run instead of
    /// being stranded. `Ok(true)` iff the job was found queued.
    async fn cancel_queued(&self, id: &str, enqueue_dependents: bool)
        -> Result<bool, BrokerError>;
}

//! Cancellation - locating and removing jobs across broker states.
//!
//! A job to cancel may be running on a worker, registered for a future
//! time (plain or cron), or queued and waiting. The coordinator probes
//! the three state sets in that order and acts on the first hit. Ids
//! absent from all three are reported, not fatal: batch cancellation has
//! partial-success semantics, and re-cancelling a finished or already
//! cancelled id simply classifies as not found.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::broker::{Broker, BrokerError};

/// A batch cancellation request.
#[derive(Debug, Clone, Deserialize)]
pub struct UnscheduleRequest {
    /// Job ids to cancel.
    pub job_ids: Vec<String>,
    /// Release dependents of each cancelled job to run instead of
    /// stranding them.
    #[serde(default)]
    pub enqueue_dependents: bool,
}

/// How a job was actually removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAction {
    /// The owning worker was signalled to abort it.
    AbortedRunning,
    /// Removed from the scheduled-future registry before it ever ran.
    RemovedScheduled,
    /// Cancelled directly off its queue.
    CancelledQueued,
}

impl std::fmt::Display for CancelAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AbortedRunning => "aborted running job",
            Self::RemovedScheduled => "removed scheduled job",
            Self::CancelledQueued => "cancelled queued job",
        };
        f.write_str(s)
    }
}

/// One successfully cancelled job, paired with the action taken.
#[derive(Debug, Clone, Serialize)]
pub struct CancelledJob {
    /// The job id.
    pub id: String,
    /// Which state set it was found in.
    pub action: CancelAction,
}

/// Outcome of a batch cancellation.
#[derive(Debug, Clone, Serialize)]
pub struct UnscheduleOutcome {
    /// Jobs actually acted on.
    pub cancelled: Vec<CancelledJob>,
    /// Ids found in none of the three state sets.
    pub not_found: Vec<String>,
    /// Status message for the caller.
    pub message: String,
}

/// Cancellation failures. Only broker transport problems abort a batch;
/// missing jobs never do.
#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    /// The broker failed while probing or removing a job.
    #[error("broker cancellation failed: {0}")]
    Broker(#[from] BrokerError),
}

/// Locates and removes jobs regardless of their current state.
pub struct CancellationCoordinator {
    broker: Arc<dyn Broker>,
}

impl std::fmt::Debug for CancellationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationCoordinator").finish_non_exhaustive()
    }
}

impl CancellationCoordinator {
    /// Build a coordinator over the given broker handle.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Cancel each id in the request, reporting per-id outcomes.
    pub async fn unschedule(
        &self,
        request: UnscheduleRequest,
    ) -> Result<UnscheduleOutcome, CancelError> {
        let mut cancelled = Vec::new();
        let mut not_found = Vec::new();

        for id in &request.job_ids {
            match self.cancel_one(id, request.enqueue_dependents).await? {
                Some(action) => {
                    tracing::info!(job_id = %id, action = %action, "Job cancelled");
                    cancelled.push(CancelledJob {
                        id: id.clone(),
                        action,
                    });
                }
                None => {
                    tracing::warn!(job_id = %id, "Cancellation target not found");
                    not_found.push(id.clone());
                }
            }
        }

        let message = summarize(&cancelled, &not_found);
        Ok(UnscheduleOutcome {
            cancelled,
            not_found,
            message,
        })
    }

    /// Probe running → scheduled → queued; first hit wins.
    async fn cancel_one(
        &self,
        id: &str,
        enqueue_dependents: bool,
    ) -> Result<Option<CancelAction>, CancelError> {
        if self.broker.abort_running(id).await? {
            return Ok(Some(CancelAction::AbortedRunning));
        }
        if self.broker.remove_scheduled(id).await? {
            return Ok(Some(CancelAction::RemovedScheduled));
        }
        if self.broker.cancel_queued(id, enqueue_dependents).await? {
            return Ok(Some(CancelAction::CancelledQueued));
        }
        Ok(None)
    }
}

fn summarize(cancelled: &[CancelledJob], not_found: &[String]) -> String {
    if not_found.is_empty() {
        format!("Unscheduled {} job(s)", cancelled.len())
    } else {
        format!(
            "Unscheduled {} job(s); not found: {}",
            cancelled.len(),
            not_found.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InMemoryBroker, JobSpec};
    use crate::registry::ExecPolicy;
    use chrono::{Duration, Utc};

    fn job() -> JobSpec {
        JobSpec {
            task: "do_something".to_string(),
            handler: "tasks.do_something".to_string(),
            queue: "default".to_string(),
            kwargs: serde_json::Map::new(),
            policy: ExecPolicy::default(),
        }
    }

    fn request(ids: Vec<String>) -> UnscheduleRequest {
        UnscheduleRequest {
            job_ids: ids,
            enqueue_dependents: false,
        }
    }

    async fn setup() -> (Arc<InMemoryBroker>, CancellationCoordinator) {
        let broker = Arc::new(InMemoryBroker::new());
        let coordinator = CancellationCoordinator::new(Arc::clone(&broker) as Arc<dyn Broker>);
        (broker, coordinator)
    }

    #[tokio::test]
    async fn cancels_a_queued_job() {
        let (broker, coordinator) = setup().await;
        let id = broker.enqueue(job()).await.unwrap();

        let outcome = coordinator.unschedule(request(vec![id.clone()])).await.unwrap();
        assert_eq!(outcome.cancelled.len(), 1);
        assert_eq!(outcome.cancelled[0].action, CancelAction::CancelledQueued);
        assert!(outcome.not_found.is_empty());
        assert!(broker.queued_ids("default").is_empty());
    }

    #[tokio::test]
    async fn removes_a_scheduled_job_before_it_runs() {
        let (broker, coordinator) = setup().await;
        let id = broker
            .enqueue_at(Utc::now() + Duration::hours(1), job())
            .await
            .unwrap();

        let outcome = coordinator.unschedule(request(vec![id.clone()])).await.unwrap();
        assert_eq!(outcome.cancelled[0].action, CancelAction::RemovedScheduled);
        assert!(broker.fetch_job(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn aborts_a_running_job() {
        let (broker, coordinator) = setup().await;
        let id = broker.enqueue(job()).await.unwrap();
        broker.mark_running(&id);

        let outcome = coordinator.unschedule(request(vec![id])).await.unwrap();
        assert_eq!(outcome.cancelled[0].action, CancelAction::AbortedRunning);
    }

    #[tokio::test]
    async fn missing_id_does_not_abort_the_batch() {
        let (broker, coordinator) = setup().await;
        let a = broker.enqueue(job()).await.unwrap();
        let b = broker.enqueue(job()).await.unwrap();

        let outcome = coordinator
            .unschedule(request(vec![
                a.clone(),
                "no-such-job".to_string(),
                b.clone(),
            ]))
            .await
            .unwrap();

        let cancelled_ids: Vec<_> = outcome.cancelled.iter().map(|c| c.id.clone()).collect();
        assert_eq!(cancelled_ids, vec![a, b]);
        assert_eq!(outcome.not_found, vec!["no-such-job".to_string()]);
    }

    #[tokio::test]
    async fn double_cancel_is_idempotent() {
        let (broker, coordinator) = setup().await;
        let id = broker.enqueue(job()).await.unwrap();

        let first = coordinator.unschedule(request(vec![id.clone()])).await.unwrap();
        assert_eq!(first.cancelled.len(), 1);

        let second = coordinator.unschedule(request(vec![id.clone()])).await.unwrap();
        assert!(second.cancelled.is_empty());
        assert_eq!(second.not_found, vec![id]);
    }
}

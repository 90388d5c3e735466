//! Dispatch - mapping a validated request to broker submissions.
//!
//! The dispatcher owns the execution-mode decision and nothing else: it
//! issues the corresponding broker call(s), collects job ids, and wraps
//! broker failures. It never retries (that is the worker's job, per the
//! task's declared retry policy) and never touches the task's execution
//! policy beyond forwarding it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::broker::{Broker, BrokerError, JobSpec};
use crate::validator::{RequestTiming, ScheduleRequest};

/// The ids produced by one successful dispatch, plus a human-readable
/// status line.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    /// One id per broker submission.
    pub job_ids: Vec<String>,
    /// Status message for the caller.
    pub message: String,
}

/// Dispatch failures.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The broker rejected or failed the submission.
    #[error("broker dispatch failed: {0}")]
    Broker(#[from] BrokerError),
    /// A multi-timestamp dispatch failed partway. Jobs already accepted
    /// by the broker are preserved, not retracted; their ids are here.
    #[error("dispatched {}/{total} jobs before failure: {source}", issued.len())]
    Partial {
        /// Ids the broker accepted before the failure.
        issued: Vec<String>,
        /// How many submissions the request asked for.
        total: usize,
        /// The failure on the first bad call.
        source: BrokerError,
    },
}

/// Maps normalized requests to broker calls.
pub struct Dispatcher {
    broker: Arc<dyn Broker>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Build a dispatcher over the given broker handle.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Issue the broker call(s) for a validated request.
    pub async fn dispatch(
        &self,
        request: ScheduleRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let job = JobSpec {
            task: request.task.name.clone(),
            handler: request.task.handler.clone(),
            queue: request.queue.clone(),
            kwargs: request.kwargs.clone(),
            policy: request.task.policy.clone(),
        };

        match request.timing {
            RequestTiming::Immediate => {
                let id = self.broker.enqueue(job).await?;
                Ok(DispatchOutcome {
                    job_ids: vec![id],
                    message: format!("Enqueued on queue '{}'", request.queue),
                })
            }
            RequestTiming::At(at) => {
                let id = self.broker.enqueue_at(at, job).await?;
                Ok(DispatchOutcome {
                    job_ids: vec![id],
                    message: format!("Scheduled for {}", at.to_rfc3339()),
                })
            }
            RequestTiming::AtMulti(times) => self.dispatch_multi(&times, &job).await,
            RequestTiming::Cron(spec) => {
                let message = match spec.next_after(Utc::now()) {
                    Some(next) => format!(
                        "Cron schedule '{}' registered; next run at {}",
                        spec.cron_str,
                        next.to_rfc3339()
                    ),
                    None => format!("Cron schedule '{}' registered", spec.cron_str),
                };
                let id = self.broker.schedule_cron(&spec, job).await?;
                Ok(DispatchOutcome {
                    job_ids: vec![id],
                    message,
                })
            }
        }
    }

    /// N independent submissions, in order. A failure on call i does not
    /// retract calls already made for j < i: at-most-once duplication is
    /// preferred over losing jobs the broker already accepted.
    async fn dispatch_multi(
        &self,
        times: &[DateTime<Utc>],
        job: &JobSpec,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut issued = Vec::with_capacity(times.len());
        for at in times {
            match self.broker.enqueue_at(*at, job.clone()).await {
                Ok(id) => issued.push(id),
                Err(source) => {
                    tracing::error!(
                        task = %job.task,
                        issued = issued.len(),
                        total = times.len(),
                        error = %source,
                        "Multi-timestamp dispatch failed partway"
                    );
                    return Err(DispatchError::Partial {
                        issued,
                        total: times.len(),
                        source,
                    });
                }
            }
        }
        Ok(DispatchOutcome {
            message: format!("Scheduled {} jobs", issued.len()),
            job_ids: issued,
        })
    }
}

//! In-memory broker for tests and redis-less startup.
//!
//! Implements the same contract as [`RedisBroker`](super::RedisBroker)
//! over process-local maps. Jobs are never executed; they stay in the
//! state dispatch put them in until cancelled or moved by a test helper.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{Broker, BrokerError, JobSpec, JobState, JobStatus};
use crate::cronspec::CronSpec;

#[derive(Debug)]
struct JobRecord {
    spec: JobSpec,
    status: JobStatus,
    scheduled_at: Option<DateTime<Utc>>,
    cron: Option<CronSpec>,
    dependents: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, JobRecord>,
    queues: HashMap<String, Vec<String>>,
    // Countdown for fault injection; the enqueue that decrements it to
    // zero fails.
    fail_enqueue_after: Option<usize>,
}

/// Process-local broker.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    inner: Mutex<Inner>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`-th subsequent enqueue/enqueue_at call fail, counting
    /// from 1. Test hook.
    pub fn fail_enqueue_after(&self, n: usize) {
        self.inner.lock().fail_enqueue_after = Some(n);
    }

    /// Move a queued or scheduled job into the running state, as if a
    /// worker had picked it up. Test hook.
    pub fn mark_running(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        for ids in inner.queues.values_mut() {
            ids.retain(|queued| queued != id);
        }
        match inner.jobs.get_mut(id) {
            Some(record) => {
                record.status = JobStatus::Running;
                record.scheduled_at = None;
                true
            }
            None => false,
        }
    }

    /// Record that `dependent` only runs after `parent` completes. Test hook.
    pub fn add_dependent(&self, parent: &str, dependent: &str) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.jobs.get_mut(parent) {
            record.dependents.push(dependent.to_string());
        }
    }

    /// Ids currently sitting in `queue`, in order.
    #[must_use]
    pub fn queued_ids(&self, queue: &str) -> Vec<String> {
        self.inner
            .lock()
            .queues
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of jobs the broker knows about.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    fn check_fault(inner: &mut Inner) -> Result<(), BrokerError> {
        if let Some(remaining) = inner.fail_enqueue_after {
            if remaining <= 1 {
                inner.fail_enqueue_after = None;
                return Err(BrokerError::Unavailable(
                    "injected enqueue failure".to_string(),
                ));
            }
            inner.fail_enqueue_after = Some(remaining - 1);
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(&self, job: JobSpec) -> Result<String, BrokerError> {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock();
        Self::check_fault(&mut inner)?;

        let queue = job.queue.clone();
        let ids = inner.queues.entry(queue).or_default();
        if job.policy.at_front {
            ids.insert(0, id.clone());
        } else {
            ids.push(id.clone());
        }
        inner.jobs.insert(
            id.clone(),
            JobRecord {
                spec: job,
                status: JobStatus::Queued,
                scheduled_at: None,
                cron: None,
                dependents: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn enqueue_at(&self, at: DateTime<Utc>, job: JobSpec) -> Result<String, BrokerError> {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock();
        Self::check_fault(&mut inner)?;

        inner.jobs.insert(
            id.clone(),
            JobRecord {
                spec: job,
                status: JobStatus::Scheduled,
                scheduled_at: Some(at),
                cron: None,
                dependents: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn schedule_cron(&self, spec: &CronSpec, job: JobSpec) -> Result<String, BrokerError> {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock();
        inner.jobs.insert(
            id.clone(),
            JobRecord {
                spec: job,
                status: JobStatus::Scheduled,
                scheduled_at: None,
                cron: Some(spec.clone()),
                dependents: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn fetch_job(&self, id: &str) -> Result<Option<JobState>, BrokerError> {
        let inner = self.inner.lock();
        Ok(inner.jobs.get(id).map(|record| JobState {
            id: id.to_string(),
            task: record.spec.task.clone(),
            queue: record.spec.queue.clone(),
            status: record.status,
            scheduled_at: record.scheduled_at,
        }))
    }

    async fn abort_running(&self, id: &str) -> Result<bool, BrokerError> {
        let mut inner = self.inner.lock();
        match inner.jobs.get_mut(id) {
            Some(record) if record.status == JobStatus::Running => {
                record.status = JobStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_scheduled(&self, id: &str) -> Result<bool, BrokerError> {
        let mut inner = self.inner.lock();
        let is_scheduled = matches!(
            inner.jobs.get(id),
            Some(record)
                if record.status == JobStatus::Scheduled
                    && (record.scheduled_at.is_some() || record.cron.is_some())
        );
        if is_scheduled {
            inner.jobs.remove(id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn cancel_queued(
        &self,
        id: &str,
        enqueue_dependents: bool,
    ) -> Result<bool, BrokerError> {
        let mut inner = self.inner.lock();

        let mut found = false;
        for ids in inner.queues.values_mut() {
            let before = ids.len();
            ids.retain(|queued| queued != id);
            if ids.len() < before {
                found = true;
            }
        }
        if !found {
            return Ok(false);
        }

        let dependents = match inner.jobs.get_mut(id) {
            Some(record) => {
                record.status = JobStatus::Cancelled;
                std::mem::take(&mut record.dependents)
            }
            None => Vec::new(),
        };

        if enqueue_dependents {
            for dep in dependents {
                let dep_queue = inner.jobs.get(&dep).map(|r| r.spec.queue.clone());
                if let Some(queue) = dep_queue {
                    if let Some(record) = inner.jobs.get_mut(&dep) {
                        record.status = JobStatus::Queued;
                    }
                    inner.queues.entry(queue).or_default().push(dep);
                }
            }
        }
        Ok(true)
    }
}

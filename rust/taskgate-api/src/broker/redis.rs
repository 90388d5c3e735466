//! Redis-backed broker using an RQ-compatible key layout.
//!
//! Key layout:
//! - `rq:job:<id>` hash: the persisted job record
//! - `rq:queue:<name>` list: ready-to-run job ids, workers pop from it
//! - `rq:queues` set: known queue names
//! - `rq:scheduler:scheduled_jobs` zset: job ids scored by due epoch
//! - `rq:cron_schedules` set: ids of recurring schedule registrations
//! - `rq:job:<id>:dependents` set: ids of jobs gated on `<id>`
//! - `rq:workers` set / `rq:worker:<name>` hash: active workers and the
//!   job each is currently executing
//! - `rq:command:<worker>` list: command channel a worker polls; pushing
//!   `kill-horse` aborts its current job
//!
//! The connection manager is created lazily on first use. `OnceCell`
//! guarantees a single manager even when many requests race to create it,
//! and the manager itself is cloneable and safe for concurrent use.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::{Broker, BrokerError, JobSpec, JobState, JobStatus};
use crate::cronspec::CronSpec;

/// Broker implementation over Redis.
pub struct RedisBroker {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("connected", &self.conn.initialized())
            .finish_non_exhaustive()
    }
}

impl RedisBroker {
    /// Create a broker for the given Redis URL. No connection is made
    /// until the first operation needs one.
    pub fn new(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
        })
    }

    /// Get the shared connection manager, creating it on first use.
    async fn conn(&self) -> Result<ConnectionManager, BrokerError> {
        init_once(&self.conn, || async {
            tracing::info!(component = "broker", "Connecting to Redis");
            ConnectionManager::new(self.client.clone())
                .await
                .map_err(BrokerError::from)
        })
        .await
    }

    /// Persist the job record hash.
    async fn store_job(
        &self,
        conn: &mut ConnectionManager,
        id: &str,
        job: &JobSpec,
        status: JobStatus,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<(), BrokerError> {
        let kwargs = serde_json::to_string(&job.kwargs)
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;
        let policy = serde_json::to_string(&job.policy)
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;

        let mut fields = vec![
            ("task".to_string(), job.task.clone()),
            ("handler".to_string(), job.handler.clone()),
            ("queue".to_string(), job.queue.clone()),
            ("kwargs".to_string(), kwargs),
            ("policy".to_string(), policy),
            ("status".to_string(), status.to_string()),
            ("created_at".to_string(), Utc::now().to_rfc3339()),
        ];
        if let Some(at) = scheduled_at {
            fields.push(("scheduled_at".to_string(), at.timestamp().to_string()));
        }

        let _: () = conn.hset_multiple(job_key(id), &fields).await?;
        Ok(())
    }
}

/// Run `init` at most once per cell even when many callers race for the
/// first use; every caller gets a clone of the single stored value. A
/// failed init leaves the cell empty, so the next caller retries.
async fn init_once<T, E, F, Fut>(cell: &OnceCell<T>, init: F) -> Result<T, E>
where
    T: Clone,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let value = cell.get_or_try_init(init).await?;
    Ok(value.clone())
}

fn job_key(id: &str) -> String {
    format!("rq:job:{id}")
}

fn queue_key(name: &str) -> String {
    format!("rq:queue:{name}")
}

fn dependents_key(id: &str) -> String {
    format!("rq:job:{id}:dependents")
}

const SCHEDULED_ZSET: &str = "rq:scheduler:scheduled_jobs";
const CRON_SET: &str = "rq:cron_schedules";
const QUEUES_SET: &str = "rq:queues";
const WORKERS_SET: &str = "rq:workers";

#[async_trait]
impl Broker for RedisBroker {
    async fn enqueue(&self, job: JobSpec) -> Result<String, BrokerError> {
        let id = Uuid::new_v4().to_string();
        let mut conn = self.conn().await?;

        self.store_job(&mut conn, &id, &job, JobStatus::Queued, None)
            .await?;
        let _: () = conn.sadd(QUEUES_SET, &job.queue).await?;
        if job.policy.at_front {
            let _: () = conn.lpush(queue_key(&job.queue), &id).await?;
        } else {
            let _: () = conn.rpush(queue_key(&job.queue), &id).await?;
        }

        tracing::info!(job_id = %id, task = %job.task, queue = %job.queue, "Job enqueued");
        Ok(id)
    }

    async fn enqueue_at(&self, at: DateTime<Utc>, job: JobSpec) -> Result<String, BrokerError> {
        let id = Uuid::new_v4().to_string();
        let mut conn = self.conn().await?;

        self.store_job(&mut conn, &id, &job, JobStatus::Scheduled, Some(at))
            .await?;
        let _: () = conn.zadd(SCHEDULED_ZSET, &id, at.timestamp()).await?;

        tracing::info!(job_id = %id, task = %job.task, at = %at.to_rfc3339(), "Job scheduled");
        Ok(id)
    }

    async fn schedule_cron(&self, spec: &CronSpec, job: JobSpec) -> Result<String, BrokerError> {
        let id = Uuid::new_v4().to_string();
        let mut conn = self.conn().await?;

        self.store_job(&mut conn, &id, &job, JobStatus::Scheduled, None)
            .await?;

        let mut fields = vec![("cron".to_string(), spec.cron_str.clone())];
        if let Some(repeat) = spec.repeat {
            fields.push(("repeat".to_string(), repeat.to_string()));
        }
        if let Some(result_ttl) = spec.result_ttl {
            fields.push(("result_ttl".to_string(), result_ttl.to_string()));
        }
        if let Some(ttl) = spec.ttl {
            fields.push(("ttl".to_string(), ttl.to_string()));
        }
        let _: () = conn.hset_multiple(job_key(&id), &fields).await?;
        let _: () = conn.sadd(CRON_SET, &id).await?;

        tracing::info!(job_id = %id, task = %job.task, cron = %spec.cron_str, "Cron schedule registered");
        Ok(id)
    }

    async fn fetch_job(&self, id: &str) -> Result<Option<JobState>, BrokerError> {
        let mut conn = self.conn().await?;
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(job_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let status = match fields.get("status").map(String::as_str) {
            Some("queued") => JobStatus::Queued,
            Some("scheduled") => JobStatus::Scheduled,
            Some("running") => JobStatus::Running,
            Some("finished") => JobStatus::Finished,
            Some("cancelled") => JobStatus::Cancelled,
            other => {
                return Err(BrokerError::Protocol(format!(
                    "job {id} has unrecognized status {other:?}"
                )))
            }
        };
        let scheduled_at = fields
            .get("scheduled_at")
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        Ok(Some(JobState {
            id: id.to_string(),
            task: fields.get("task").cloned().unwrap_or_default(),
            queue: fields.get("queue").cloned().unwrap_or_default(),
            status,
            scheduled_at,
        }))
    }

    async fn abort_running(&self, id: &str) -> Result<bool, BrokerError> {
        let mut conn = self.conn().await?;

        let workers: Vec<String> = conn.smembers(WORKERS_SET).await?;
        for worker in workers {
            let current: Option<String> = conn
                .hget(format!("rq:worker:{worker}"), "current_job")
                .await?;
            if current.as_deref() == Some(id) {
                // Same mechanism as RQ's kill-horse command.
                let _: () = conn
                    .rpush(format!("rq:command:{worker}"), "kill-horse")
                    .await?;
                let _: () = conn
                    .hset(job_key(id), "status", JobStatus::Cancelled.to_string())
                    .await?;
                tracing::info!(job_id = %id, worker = %worker, "Running job abort signalled");
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn remove_scheduled(&self, id: &str) -> Result<bool, BrokerError> {
        let mut conn = self.conn().await?;

        let removed_at: i64 = conn.zrem(SCHEDULED_ZSET, id).await?;
        let removed_cron: i64 = conn.srem(CRON_SET, id).await?;
        if removed_at == 0 && removed_cron == 0 {
            return Ok(false);
        }

        let _: () = conn.del(job_key(id)).await?;
        tracing::info!(job_id = %id, "Scheduled job removed");
        Ok(true)
    }

    async fn cancel_queued(
        &self,
        id: &str,
        enqueue_dependents: bool,
    ) -> Result<bool, BrokerError> {
        let mut conn = self.conn().await?;

        let queue: Option<String> = conn.hget(job_key(id), "queue").await?;
        let Some(queue) = queue else {
            return Ok(false);
        };

        let removed: i64 = conn.lrem(queue_key(&queue), 0, id).await?;
        if removed == 0 {
            return Ok(false);
        }
        let _: () = conn
            .hset(job_key(id), "status", JobStatus::Cancelled.to_string())
            .await?;

        if enqueue_dependents {
            let dependents: Vec<String> = conn.smembers(dependents_key(id)).await?;
            for dep in dependents {
                let dep_queue: Option<String> = conn.hget(job_key(&dep), "queue").await?;
                if let Some(dep_queue) = dep_queue {
                    let _: () = conn
                        .hset(job_key(&dep), "status", JobStatus::Queued.to_string())
                        .await?;
                    let _: () = conn.rpush(queue_key(&dep_queue), &dep).await?;
                    tracing::info!(job_id = %dep, parent = %id, "Dependent released");
                }
            }
        }
        let _: () = conn.del(dependents_key(id)).await?;

        tracing::info!(job_id = %id, queue = %queue, "Queued job cancelled");
        Ok(true)
    }
}

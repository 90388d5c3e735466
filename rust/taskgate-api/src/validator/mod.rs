//! Request validation and normalization.
//!
//! Turns a raw wire-shaped submission into an immutable [`ScheduleRequest`]
//! or rejects it with a specific, named error. Checks run in a fixed
//! precedence order and the first violated rule short-circuits. This
//! component performs no broker I/O.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::cronspec::CronSpec;
use crate::registry::{KwargsProblem, RegistryError, ResolveFailure, TaskDescriptor, TaskRegistry};

/// Explicit timestamps may not be further out than this.
pub const MAX_SCHEDULE_HORIZON_DAYS: i64 = 30;

/// The `when` field as it arrives on the wire: a single timestamp or a
/// list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WhenInput {
    /// One timestamp.
    One(String),
    /// Several timestamps, each dispatched as its own job.
    Many(Vec<String>),
}

/// A raw, unvalidated submission.
#[derive(Debug, Clone, Deserialize)]
pub struct RawScheduleRequest {
    /// Name of the task to run.
    pub task_name: String,
    /// Target queue; the configured default queue when omitted.
    #[serde(default)]
    pub queue_name: Option<String>,
    /// Future execution time(s). Mutually exclusive with `cron`.
    #[serde(default)]
    pub when: Option<WhenInput>,
    /// Recurrence rule. Mutually exclusive with `when`.
    #[serde(default)]
    pub cron: Option<CronSpec>,
    /// Keyword arguments for the task.
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

/// Normalized execution mode. Mutually exclusive and covering: every
/// request that survives validation is exactly one of these.
#[derive(Debug, Clone)]
pub enum RequestTiming {
    /// Enqueue now.
    Immediate,
    /// Enqueue at one future instant.
    At(DateTime<Utc>),
    /// Enqueue independently at each instant.
    AtMulti(Vec<DateTime<Utc>>),
    /// Register a recurring schedule.
    Cron(CronSpec),
}

/// A validated, immutable submission ready for dispatch.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    /// Resolved task descriptor.
    pub task: TaskDescriptor,
    /// Validated queue name.
    pub queue: String,
    /// Normalized execution mode.
    pub timing: RequestTiming,
    /// Keyword arguments, already checked against the descriptor.
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

/// Validation failures, one variant per rule, each naming the offending
/// field and value.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The name is not safe as a URL path segment.
    #[error("{field} '{value}' contains URL-unsafe characters")]
    InvalidName {
        /// Which field: `task_name` or `queue_name`.
        field: &'static str,
        /// The offending value.
        value: String,
    },
    /// The task name is not registered.
    #[error("task '{0}' is not registered")]
    UnknownTask(String),
    /// The task is registered but its handler cannot be loaded.
    #[error("registered task '{name}' is not discoverable: {failure}")]
    Discovery {
        /// The task name.
        name: String,
        /// The typed resolver outcome.
        failure: ResolveFailure,
    },
    /// The queue name is not registered.
    #[error("queue '{0}' is not registered")]
    UnknownQueue(String),
    /// Both `when` and `cron` were set.
    #[error("cannot set both 'when' and 'cron' on one request")]
    TimingConflict,
    /// A timestamp is out of range or malformed.
    #[error("timestamp '{value}' rejected: {reason}")]
    TimestampRange {
        /// The offending timestamp as submitted.
        value: String,
        /// Which timing rule it violates.
        reason: String,
    },
    /// The cron expression does not parse.
    #[error("cron expression '{expr}' is invalid: {reason}")]
    InvalidCron {
        /// The offending expression.
        expr: String,
        /// Parser diagnostic.
        reason: String,
    },
    /// The kwargs bag does not satisfy the task's declared schema.
    #[error("kwargs do not match task '{task}': {problem}")]
    KwargsMismatch {
        /// The offending task.
        task: String,
        /// What exactly is wrong.
        problem: KwargsProblem,
    },
}

/// Validates raw submissions against the registry and the configured
/// queue table.
#[derive(Debug)]
pub struct RequestValidator {
    registry: Arc<TaskRegistry>,
    queues: HashMap<String, String>,
    default_queue: String,
}

impl RequestValidator {
    /// Build a validator over the given registry and queue table.
    #[must_use]
    pub fn new(
        registry: Arc<TaskRegistry>,
        queues: HashMap<String, String>,
        default_queue: String,
    ) -> Self {
        Self {
            registry,
            queues,
            default_queue,
        }
    }

    /// Validate and normalize a raw request.
    pub fn validate(&self, raw: RawScheduleRequest) -> Result<ScheduleRequest, ValidationError> {
        self.validate_at(raw, Utc::now())
    }

    /// Validation with an explicit clock, used by tests.
    pub fn validate_at(
        &self,
        raw: RawScheduleRequest,
        now: DateTime<Utc>,
    ) -> Result<ScheduleRequest, ValidationError> {
        // 1. task-name syntax
        check_url_safe("task_name", &raw.task_name)?;

        // 2-3. task registered and discoverable
        let task = self
            .registry
            .resolve(&raw.task_name)
            .map_err(|err| match err {
                RegistryError::UnknownTask(name) => ValidationError::UnknownTask(name),
                RegistryError::Discovery { name, failure } => {
                    ValidationError::Discovery { name, failure }
                }
                RegistryError::DuplicateTask(name) => {
                    // resolve() never reports duplicates; treat as unknown.
                    ValidationError::UnknownTask(name)
                }
            })?
            .clone();

        // 4. queue-name syntax and registration
        let queue_name = raw
            .queue_name
            .unwrap_or_else(|| self.default_queue.clone());
        check_url_safe("queue_name", &queue_name)?;
        let queue = self
            .queues
            .get(&queue_name)
            .cloned()
            .ok_or(ValidationError::UnknownQueue(queue_name))?;

        // 5. timing exclusivity
        if raw.when.is_some() && raw.cron.is_some() {
            return Err(ValidationError::TimingConflict);
        }

        // 6-7. timestamp / cron validity
        let timing = match (raw.when, raw.cron) {
            (None, None) => RequestTiming::Immediate,
            (Some(when), None) => self.check_when(when, now)?,
            (None, Some(spec)) => {
                if let Err(err) = spec.parse() {
                    return Err(ValidationError::InvalidCron {
                        expr: spec.cron_str,
                        reason: err.to_string(),
                    });
                }
                RequestTiming::Cron(spec)
            }
            (Some(_), Some(_)) => unreachable!("exclusivity checked above"),
        };

        // 8. kwargs against the declared schema
        TaskRegistry::kwargs_satisfy(&task, &raw.kwargs).map_err(|problem| {
            ValidationError::KwargsMismatch {
                task: task.name.clone(),
                problem,
            }
        })?;

        Ok(ScheduleRequest {
            task,
            queue,
            timing,
            kwargs: raw.kwargs,
        })
    }

    /// Validate all timestamps; any one bad element rejects the whole
    /// request. A one-element list collapses to `At`.
    fn check_when(
        &self,
        when: WhenInput,
        now: DateTime<Utc>,
    ) -> Result<RequestTiming, ValidationError> {
        let raw_values = match when {
            WhenInput::One(value) => vec![value],
            WhenInput::Many(values) => values,
        };
        if raw_values.is_empty() {
            return Err(ValidationError::TimestampRange {
                value: "[]".to_string(),
                reason: "'when' list must contain at least one timestamp".to_string(),
            });
        }

        let mut parsed = Vec::with_capacity(raw_values.len());
        for value in raw_values {
            parsed.push(check_timestamp(&value, now)?);
        }

        Ok(if parsed.len() == 1 {
            RequestTiming::At(parsed[0])
        } else {
            RequestTiming::AtMulti(parsed)
        })
    }
}

/// A name is URL-safe iff percent-encoding it is a no-op.
fn check_url_safe(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || urlencoding::encode(value) != value {
        return Err(ValidationError::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// One timestamp: RFC 3339, UTC-qualified, strictly future, within the
/// scheduling horizon.
fn check_timestamp(value: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ValidationError> {
    let parsed = DateTime::parse_from_rfc3339(value).map_err(|err| {
        ValidationError::TimestampRange {
            value: value.to_string(),
            reason: format!("not a valid RFC 3339 timestamp: {err}"),
        }
    })?;

    if parsed.offset().local_minus_utc() != 0 {
        return Err(ValidationError::TimestampRange {
            value: value.to_string(),
            reason: "must be UTC (YYYY-MM-DDTHH:MM:SS+00:00 or ...Z)".to_string(),
        });
    }
    let utc = parsed.with_timezone(&Utc);

    if utc <= now {
        return Err(ValidationError::TimestampRange {
            value: value.to_string(),
            reason: "is in the past".to_string(),
        });
    }
    if utc > now + Duration::days(MAX_SCHEDULE_HORIZON_DAYS) {
        return Err(ValidationError::TimestampRange {
            value: value.to_string(),
            reason: format!("is more than {MAX_SCHEDULE_HORIZON_DAYS} days in the future"),
        });
    }
    Ok(utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ExecPolicy, ParamSpec, StaticResolver};
    use serde_json::{json, Map};

    fn validator() -> RequestValidator {
        let resolver = Arc::new(StaticResolver::new(vec![
            "tasks.do_something".to_string(),
            "tasks.raise_exception".to_string(),
        ]));
        let mut registry = TaskRegistry::new(resolver);
        registry
            .register(TaskDescriptor {
                name: "do_something".to_string(),
                handler: "tasks.do_something".to_string(),
                params: vec![ParamSpec {
                    name: "how_long".to_string(),
                    required: true,
                    default: None,
                }],
                policy: ExecPolicy::default(),
            })
            .unwrap();
        registry
            .register(TaskDescriptor {
                name: "ghost".to_string(),
                handler: "tasks.gone".to_string(),
                params: vec![],
                policy: ExecPolicy::default(),
            })
            .unwrap();

        let mut queues = HashMap::new();
        queues.insert("default".to_string(), "default".to_string());
        queues.insert("scheduled".to_string(), "scheduled".to_string());
        RequestValidator::new(Arc::new(registry), queues, "default".to_string())
    }

    fn raw(task: &str) -> RawScheduleRequest {
        let mut kwargs = Map::new();
        if task == "do_something" {
            kwargs.insert("how_long".to_string(), json!(1));
        }
        RawScheduleRequest {
            task_name: task.to_string(),
            queue_name: None,
            when: None,
            cron: None,
            kwargs,
        }
    }

    fn future(now: DateTime<Utc>, hours: i64) -> String {
        (now + Duration::hours(hours)).to_rfc3339()
    }

    #[test]
    fn immediate_request_with_matching_kwargs() {
        let request = validator().validate(raw("do_something")).unwrap();
        assert!(matches!(request.timing, RequestTiming::Immediate));
        assert_eq!(request.queue, "default");
        assert_eq!(request.task.name, "do_something");
    }

    #[test]
    fn unsafe_task_name_rejected_first() {
        let mut r = raw("do_something");
        r.task_name = "invalid&task".to_string();
        let err = validator().validate(r).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidName { field: "task_name", .. }
        ));
    }

    #[test]
    fn unregistered_task_rejected() {
        let err = validator().validate(raw("does_not_exist")).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownTask(name) if name == "does_not_exist"));
    }

    #[test]
    fn undiscoverable_task_rejected() {
        let err = validator().validate(raw("ghost")).unwrap_err();
        assert!(matches!(err, ValidationError::Discovery { name, .. } if name == "ghost"));
    }

    #[test]
    fn unknown_queue_rejected() {
        let mut r = raw("do_something");
        r.queue_name = Some("does_not_exist_queue".to_string());
        let err = validator().validate(r).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownQueue(name) if name == "does_not_exist_queue"));
    }

    #[test]
    fn url_unsafe_queue_rejected() {
        let mut r = raw("do_something");
        r.queue_name = Some("invalid queue".to_string());
        let err = validator().validate(r).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidName { field: "queue_name", .. }
        ));
    }

    #[test]
    fn when_and_cron_always_conflict() {
        let now = Utc::now();
        let mut r = raw("do_something");
        r.when = Some(WhenInput::One(future(now, 1)));
        r.cron = Some(CronSpec {
            cron_str: "0 12 * * *".to_string(),
            repeat: None,
            result_ttl: None,
            ttl: None,
        });
        let err = validator().validate_at(r, now).unwrap_err();
        assert!(matches!(err, ValidationError::TimingConflict));
    }

    #[test]
    fn past_timestamp_rejected() {
        let now = Utc::now();
        let mut r = raw("do_something");
        r.when = Some(WhenInput::One((now - Duration::hours(1)).to_rfc3339()));
        let err = validator().validate_at(r, now).unwrap_err();
        assert!(matches!(err, ValidationError::TimestampRange { .. }));
    }

    #[test]
    fn beyond_horizon_rejected() {
        let now = Utc::now();
        let mut r = raw("do_something");
        r.when = Some(WhenInput::One((now + Duration::days(31)).to_rfc3339()));
        let err = validator().validate_at(r, now).unwrap_err();
        assert!(matches!(err, ValidationError::TimestampRange { .. }));
    }

    #[test]
    fn non_utc_offset_rejected() {
        let now = Utc::now();
        let mut r = raw("do_something");
        let local = (now + Duration::hours(2))
            .with_timezone(&chrono::FixedOffset::east_opt(3600).unwrap());
        r.when = Some(WhenInput::One(local.to_rfc3339()));
        let err = validator().validate_at(r, now).unwrap_err();
        assert!(matches!(err, ValidationError::TimestampRange { .. }));
    }

    #[test]
    fn in_window_utc_timestamp_accepted() {
        let now = Utc::now();
        let mut r = raw("do_something");
        r.when = Some(WhenInput::One(future(now, 1)));
        let request = validator().validate_at(r, now).unwrap();
        assert!(matches!(request.timing, RequestTiming::At(_)));
    }

    #[test]
    fn one_element_list_collapses_to_at() {
        let now = Utc::now();
        let mut r = raw("do_something");
        r.when = Some(WhenInput::Many(vec![future(now, 1)]));
        let request = validator().validate_at(r, now).unwrap();
        assert!(matches!(request.timing, RequestTiming::At(_)));
    }

    #[test]
    fn any_bad_list_element_rejects_the_whole_request() {
        let now = Utc::now();
        let mut r = raw("do_something");
        r.when = Some(WhenInput::Many(vec![
            future(now, 1),
            (now - Duration::hours(1)).to_rfc3339(),
            future(now, 3),
        ]));
        let err = validator().validate_at(r, now).unwrap_err();
        assert!(matches!(err, ValidationError::TimestampRange { .. }));
    }

    #[test]
    fn empty_when_list_rejected() {
        let mut r = raw("do_something");
        r.when = Some(WhenInput::Many(vec![]));
        let err = validator().validate(r).unwrap_err();
        assert!(matches!(err, ValidationError::TimestampRange { .. }));
    }

    #[test]
    fn invalid_cron_rejected() {
        let mut r = raw("do_something");
        r.cron = Some(CronSpec {
            cron_str: "invalid cron expression".to_string(),
            repeat: None,
            result_ttl: None,
            ttl: None,
        });
        let err = validator().validate(r).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCron { .. }));
    }

    #[test]
    fn valid_cron_accepted() {
        let mut r = raw("do_something");
        r.cron = Some(CronSpec {
            cron_str: "0 12 * * *".to_string(),
            repeat: Some(5),
            result_ttl: None,
            ttl: None,
        });
        let request = validator().validate(r).unwrap();
        assert!(matches!(request.timing, RequestTiming::Cron(_)));
    }

    #[test]
    fn unknown_kwarg_rejected() {
        let mut r = raw("do_something");
        r.kwargs
            .insert("invalid_kwarg".to_string(), json!(true));
        let err = validator().validate(r).unwrap_err();
        assert!(
            matches!(err, ValidationError::KwargsMismatch { task, .. } if task == "do_something")
        );
    }

    #[test]
    fn missing_required_kwarg_rejected() {
        let mut r = raw("do_something");
        r.kwargs.clear();
        let err = validator().validate(r).unwrap_err();
        assert!(matches!(err, ValidationError::KwargsMismatch { .. }));
    }
}

//! Schedule and unschedule endpoints.
//!
//! Thin I/O over the validator, dispatcher, and cancellation coordinator.
//! Every error response carries a `{type, title, detail}` body naming the
//! failing field or identifier.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::cancel::UnscheduleRequest;
use crate::dispatcher::DispatchError;
use crate::validator::{RawScheduleRequest, ValidationError};
use crate::AppState;

/// Schedule routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedule", post(schedule))
        .route("/unschedule", post(unschedule))
}

/// Response for both schedule and unschedule.
#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    /// Job ids produced (schedule) or actually cancelled (unschedule).
    pub task_ids: Vec<String>,
    /// Human-readable status line.
    pub message: String,
}

/// Wire body for `POST /unschedule`.
#[derive(Debug, Deserialize)]
pub struct UnscheduleBody {
    /// Job ids to cancel.
    pub task_ids: Vec<String>,
    /// Also release dependents of each cancelled job.
    #[serde(default)]
    pub enqueue_dependents: bool,
}

/// Error body, problem-details shaped.
#[derive(Debug, Serialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: String,
    title: String,
    detail: String,
}

/// An API error ready to render.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: String,
    title: String,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &str, title: &str, detail: String) -> Self {
        Self {
            status,
            kind: kind.to_string(),
            title: title.to_string(),
            detail,
        }
    }

    fn internal(path: &str, detail: String) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            path,
            "Internal Server Error",
            detail,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            kind: self.kind,
            title: self.title,
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let (kind, title) = match &err {
            ValidationError::InvalidName { .. } => ("validation/invalid-name", "Invalid Name"),
            ValidationError::UnknownTask(_) => ("validation/unknown-task", "Unknown Task"),
            ValidationError::Discovery { .. } => {
                ("validation/discovery", "Task Not Discoverable")
            }
            ValidationError::UnknownQueue(_) => ("validation/unknown-queue", "Unknown Queue"),
            ValidationError::TimingConflict => {
                ("validation/timing-conflict", "Timing Conflict")
            }
            ValidationError::TimestampRange { .. } => {
                ("validation/timestamp-range", "Timestamp Out Of Range")
            }
            ValidationError::InvalidCron { .. } => ("validation/invalid-cron", "Invalid Cron"),
            ValidationError::KwargsMismatch { .. } => {
                ("validation/kwargs-mismatch", "Kwargs Mismatch")
            }
        };
        Self::new(StatusCode::BAD_REQUEST, kind, title, err.to_string())
    }
}

/// Schedule a task.
///
/// # Endpoint
///
/// `POST /schedule`
async fn schedule(
    State(state): State<AppState>,
    Json(raw): Json<RawScheduleRequest>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let task_name = raw.task_name.clone();
    let request = state.validator.validate(raw)?;

    let outcome = state.dispatcher.dispatch(request).await.map_err(|err| {
        tracing::error!(task = %task_name, error = %err, "Dispatch failed");
        match &err {
            DispatchError::Partial { issued, total, source } => ApiError::internal(
                "/schedule",
                format!(
                    "dispatched {}/{total} jobs before failure ({source}); accepted ids: {}",
                    issued.len(),
                    issued.join(", ")
                ),
            ),
            DispatchError::Broker(source) => {
                ApiError::internal("/schedule", source.to_string())
            }
        }
    })?;

    Ok(Json(ScheduleResponse {
        task_ids: outcome.job_ids,
        message: outcome.message,
    }))
}

/// Cancel previously scheduled jobs.
///
/// # Endpoint
///
/// `POST /unschedule`
async fn unschedule(
    State(state): State<AppState>,
    Json(body): Json<UnscheduleBody>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let outcome = state
        .coordinator
        .unschedule(UnscheduleRequest {
            job_ids: body.task_ids,
            enqueue_dependents: body.enqueue_dependents,
        })
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "Unschedule failed");
            ApiError::internal("/unschedule", err.to_string())
        })?;

    // Missing ids never abort the batch, but a request that matched
    // nothing at all is a 404.
    if outcome.cancelled.is_empty() && !outcome.not_found.is_empty() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "unschedule/not-found",
            "Job Not Found",
            format!("no such jobs: {}", outcome.not_found.join(", ")),
        ));
    }

    Ok(Json(ScheduleResponse {
        task_ids: outcome.cancelled.into_iter().map(|c| c.id).collect(),
        message: outcome.message,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum_test::TestServer;
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    use crate::broker::{Broker, InMemoryBroker};
    use crate::config::AppConfig;
    use crate::server::create_app_with_broker;

    fn fixture() -> (Arc<InMemoryBroker>, TestServer) {
        let broker = Arc::new(InMemoryBroker::new());
        let app = create_app_with_broker(
            AppConfig::default(),
            Arc::clone(&broker) as Arc<dyn Broker>,
        )
        .expect("app builds");
        (broker, TestServer::new(app).expect("server starts"))
    }

    #[tokio::test]
    async fn schedule_immediate_returns_one_id_on_default_queue() {
        let (broker, server) = fixture();

        let response = server
            .post("/schedule")
            .json(&json!({
                "task_name": "do_something",
                "kwargs": {"how_long": 1}
            }))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        let ids = body["task_ids"].as_array().unwrap();
        assert_eq!(ids.len(), 1);

        let state = broker
            .fetch_job(ids[0].as_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.queue, "default");
    }

    #[tokio::test]
    async fn unknown_task_is_bad_request() {
        let (_broker, server) = fixture();

        let response = server
            .post("/schedule")
            .json(&json!({"task_name": "does_not_exist_task"}))
            .await;
        response.assert_status_bad_request();

        let body: Value = response.json();
        assert_eq!(body["title"], "Unknown Task");
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .contains("does_not_exist_task"));
    }

    #[tokio::test]
    async fn when_and_cron_together_is_timing_conflict() {
        let (_broker, server) = fixture();

        let when = (Utc::now() + Duration::hours(1)).to_rfc3339();
        let response = server
            .post("/schedule")
            .json(&json!({
                "task_name": "do_something",
                "kwargs": {"how_long": 1},
                "when": when,
                "cron": {"cron_str": "0 12 * * *"}
            }))
            .await;
        response.assert_status_bad_request();

        let body: Value = response.json();
        assert_eq!(body["title"], "Timing Conflict");
    }

    #[tokio::test]
    async fn bad_list_element_rejects_before_any_broker_call() {
        let (broker, server) = fixture();

        let now = Utc::now();
        let response = server
            .post("/schedule")
            .json(&json!({
                "task_name": "do_something",
                "kwargs": {"how_long": 1},
                "when": [
                    (now + Duration::hours(1)).to_rfc3339(),
                    (now - Duration::hours(1)).to_rfc3339(),
                    (now + Duration::hours(3)).to_rfc3339(),
                ]
            }))
            .await;
        response.assert_status_bad_request();
        assert_eq!(broker.job_count(), 0);
    }

    #[tokio::test]
    async fn kwargs_mismatch_names_the_task() {
        let (_broker, server) = fixture();

        let response = server
            .post("/schedule")
            .json(&json!({
                "task_name": "do_something",
                "kwargs": {"invalid_kwarg": true}
            }))
            .await;
        response.assert_status_bad_request();

        let body: Value = response.json();
        assert_eq!(body["title"], "Kwargs Mismatch");
        assert!(body["detail"].as_str().unwrap().contains("do_something"));
    }

    #[tokio::test]
    async fn unschedule_reports_partial_success() {
        let (broker, server) = fixture();

        let schedule = || {
            server.post("/schedule").json(&json!({
                "task_name": "do_something",
                "kwargs": {"how_long": 1}
            }))
        };
        let first: Value = schedule().await.json();
        let second: Value = schedule().await.json();
        let a = first["task_ids"][0].as_str().unwrap().to_string();
        let b = second["task_ids"][0].as_str().unwrap().to_string();

        let response = server
            .post("/unschedule")
            .json(&json!({
                "task_ids": [a, "no-such-job", b],
                "enqueue_dependents": false
            }))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["task_ids"].as_array().unwrap().len(), 2);
        assert!(body["message"].as_str().unwrap().contains("no-such-job"));
        assert!(broker.queued_ids("default").is_empty());
    }

    #[tokio::test]
    async fn unschedule_with_no_matches_is_not_found() {
        let (_broker, server) = fixture();

        let response = server
            .post("/unschedule")
            .json(&json!({"task_ids": ["ghost-1", "ghost-2"]}))
            .await;
        response.assert_status_not_found();

        let body: Value = response.json();
        assert_eq!(body["title"], "Job Not Found");
        assert!(body["detail"].as_str().unwrap().contains("ghost-1"));
    }

    #[tokio::test]
    async fn broker_failure_maps_to_internal_error() {
        let (broker, server) = fixture();
        broker.fail_enqueue_after(1);

        let response = server
            .post("/schedule")
            .json(&json!({
                "task_name": "do_something",
                "kwargs": {"how_long": 1}
            }))
            .await;
        response.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);

        let body: Value = response.json();
        assert_eq!(body["title"], "Internal Server Error");
    }

    #[tokio::test]
    async fn health_endpoints_respond() {
        let (_broker, server) = fixture();
        server.get("/health").await.assert_status_ok();
        server.get("/ready").await.assert_status_ok();
    }
}

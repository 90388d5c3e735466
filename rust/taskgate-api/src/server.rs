//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api;
use crate::broker::{Broker, InMemoryBroker, RedisBroker};
use crate::cancel::CancellationCoordinator;
use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::logging::OpTimer;
use crate::registry::{StaticResolver, TaskRegistry};
use crate::validator::RequestValidator;
use crate::{log_init_step, log_init_warning, log_success, AppState};

/// Create the application with all routes and middleware.
///
/// Uses the Redis broker when a URL is configured, and falls back to the
/// in-memory broker otherwise.
pub fn create_app(config: AppConfig) -> anyhow::Result<Router> {
    let broker: Arc<dyn Broker> = match config.redis.url.as_deref() {
        Some(url) => {
            log_init_step!(1, 5, "Broker", format!("Redis at {url} (lazy connect)"));
            Arc::new(RedisBroker::new(url)?)
        }
        None => {
            log_init_warning!("No Redis URL configured; using in-memory broker");
            log_init_step!(1, 5, "Broker", "In-memory");
            Arc::new(InMemoryBroker::new())
        }
    };
    create_app_with_broker(config, broker)
}

/// Create the application over an explicit broker handle. Used by tests
/// and by embedders that manage the broker themselves.
pub fn create_app_with_broker(
    config: AppConfig,
    broker: Arc<dyn Broker>,
) -> anyhow::Result<Router> {
    let overall_timer = OpTimer::new("server", "create_app");

    // [2/5] Populate the task registry from the configured table
    let step_timer = OpTimer::new("server", "registry");
    let resolver = Arc::new(StaticResolver::new(config.scheduling.handler_table()));
    let mut registry = TaskRegistry::new(resolver);
    for task in &config.scheduling.tasks {
        registry.register(task.clone())?;
    }
    let registry = Arc::new(registry);
    log_init_step!(
        2,
        5,
        "Task Registry",
        format!("{} tasks registered", registry.len())
    );
    step_timer.finish();

    // [3/5] Validator over the registry and queue table
    let validator = Arc::new(RequestValidator::new(
        Arc::clone(&registry),
        config.scheduling.queues.clone(),
        config.scheduling.default_queue.clone(),
    ));
    log_init_step!(
        3,
        5,
        "Validator",
        format!(
            "{} queues, default '{}'",
            config.scheduling.queues.len(),
            config.scheduling.default_queue
        )
    );

    // [4/5] Dispatcher and cancellation coordinator share the broker handle
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&broker)));
    let coordinator = Arc::new(CancellationCoordinator::new(broker));
    log_init_step!(4, 5, "Dispatch", "Dispatcher + cancellation coordinator ready");

    let timeout_secs = config.server.timeout_secs;
    let state = AppState {
        config: Arc::new(config),
        registry,
        validator,
        dispatcher,
        coordinator,
    };

    // [5/5] Router with middleware
    let app = api::create_router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(timeout_secs)))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    log_init_step!(5, 5, "Router", "Routes + middleware configured");

    overall_timer.finish();
    log_success!("Taskgate API created successfully");

    Ok(app)
}

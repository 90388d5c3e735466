//! Taskgate API - HTTP gateway for scheduling background jobs.
//!
//! Callers register named, keyword-argument-only units of work at startup
//! and submit execution requests over HTTP: immediately, at one or more
//! future timestamps, or on a recurring cron schedule. Accepted jobs can
//! later be cancelled wherever they currently are (running, scheduled,
//! or queued). Job state itself lives in an external broker; this service
//! only validates, dispatches, and cancels.
//!
//! # Architecture
//!
//! - [`config`]: configuration and the static task/queue tables
//! - [`registry`]: task descriptors and handler resolution
//! - [`validator`]: request validation and normalization
//! - [`dispatcher`]: execution-mode decision and broker submissions
//! - [`cancel`]: three-state cancellation coordinator
//! - [`broker`]: the broker contract, Redis and in-memory implementations
//! - [`api`]: HTTP endpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use taskgate_api::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load("config/taskgate")?;
//!     let app = create_app(config)?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod broker;
pub mod cancel;
pub mod config;
pub mod cronspec;
pub mod dispatcher;
pub mod logging;
pub mod registry;
pub mod server;
pub mod validator;

use std::sync::Arc;

use cancel::CancellationCoordinator;
use config::AppConfig;
use dispatcher::Dispatcher;
use registry::TaskRegistry;
use validator::RequestValidator;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// The static task table.
    pub registry: Arc<TaskRegistry>,
    /// Request validation and normalization.
    pub validator: Arc<RequestValidator>,
    /// Execution-mode decision and broker submissions.
    pub dispatcher: Arc<Dispatcher>,
    /// Three-state cancellation.
    pub coordinator: Arc<CancellationCoordinator>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("registry", &self.registry.len())
            .finish_non_exhaustive()
    }
}

//! Configuration management.
//!
//! Loaded once at process start from (in order) built-in defaults, an
//! optional config file, `TASKGATE`-prefixed environment
//! variables, and a handful of direct overrides (`REDIS_URL`). Holds the
//! static name→task and name→queue tables the registry and validator are
//! built from; nothing here is re-validated at request time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::registry::{ExecPolicy, ParamSpec, RetryPolicy, TaskDescriptor};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Broker (Redis) configuration.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Task and queue tables.
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from defaults, the config file at `path`
    /// (extension-less, optional), and environment variables.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.timeout_secs", 30)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("TASKGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize()?;

        if let Ok(url) = std::env::var("REDIS_URL") {
            app_config.redis.url = Some(url);
        }

        Ok(app_config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

/// Broker connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL; when absent the service falls back to the in-memory
    /// broker (useful for local development and tests).
    #[serde(default)]
    pub url: Option<String>,
}

/// The static task and queue tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Queue used when a request names none.
    #[serde(default = "default_queue_name")]
    pub default_queue: String,
    /// Registered queue names → broker queue names.
    #[serde(default = "default_queues")]
    pub queues: HashMap<String, String>,
    /// Registered tasks.
    #[serde(default = "default_tasks")]
    pub tasks: Vec<TaskDescriptor>,
    /// Handler paths the worker deployment exports, for the resolver.
    /// Defaults to the handlers of the registered tasks.
    #[serde(default)]
    pub handlers: Vec<String>,
}

impl SchedulingConfig {
    /// The exported handler table: the explicit list when configured,
    /// else every registered task's handler.
    #[must_use]
    pub fn handler_table(&self) -> Vec<String> {
        if self.handlers.is_empty() {
            self.tasks.iter().map(|t| t.handler.clone()).collect()
        } else {
            self.handlers.clone()
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            default_queue: default_queue_name(),
            queues: default_queues(),
            tasks: default_tasks(),
            handlers: Vec::new(),
        }
    }
}

fn default_queue_name() -> String {
    "default".to_string()
}

fn default_queues() -> HashMap<String, String> {
    let mut queues = HashMap::new();
    queues.insert("default".to_string(), "default".to_string());
    queues.insert("scheduled".to_string(), "scheduled".to_string());
    queues
}

/// Built-in example tasks, matching the worker deployment this service
/// ships with.
fn default_tasks() -> Vec<TaskDescriptor> {
    vec![
        TaskDescriptor {
            name: "do_something".to_string(),
            handler: "tasks.do_something".to_string(),
            params: vec![ParamSpec {
                name: "how_long".to_string(),
                required: true,
                default: None,
            }],
            policy: ExecPolicy {
                timeout_secs: Some(60),
                result_ttl_secs: Some(60),
                ..ExecPolicy::default()
            },
        },
        TaskDescriptor {
            name: "raise_exception".to_string(),
            handler: "tasks.raise_exception".to_string(),
            params: vec![],
            policy: ExecPolicy {
                timeout_secs: Some(60),
                result_ttl_secs: Some(60),
                retry: Some(RetryPolicy {
                    max: 3,
                    interval_secs: 2,
                }),
                ..ExecPolicy::default()
            },
        },
    ]
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

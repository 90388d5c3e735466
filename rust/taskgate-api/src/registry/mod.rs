//! Task registry - the static mapping from task names to callable descriptors.
//!
//! The registry is populated once at startup from the configured task table
//! and treated as read-only afterwards. Every descriptor declares its full
//! parameter schema at registration time, so validation is a simple set
//! comparison with no runtime reflection.

pub mod resolver;

pub use resolver::{HandlerResolver, ResolveFailure, StaticResolver};

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single declared parameter of a task.
///
/// Parameters are keyword-only by construction: the schema has no notion
/// of position, only names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name (the kwargs key).
    pub name: String,
    /// Whether the parameter must be supplied by the caller.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Default value used by the worker when the caller omits the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_required() -> bool {
    true
}

/// Retry policy forwarded to the broker with each submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts.
    pub max: u32,
    /// Delay between attempts, in seconds.
    #[serde(default)]
    pub interval_secs: u64,
}

/// Execution policy declared at registration time.
///
/// The dispatcher forwards this to the broker unchanged; it never invents
/// or overrides policy fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecPolicy {
    /// Hard execution timeout, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// How long the broker keeps the job result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ttl_secs: Option<u64>,
    /// How long the job may sit queued before expiring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    /// Retry policy applied by the worker, not by this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Job ids this job depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Place the job at the front of its queue.
    #[serde(default)]
    pub at_front: bool,
    /// Handler path invoked on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    /// Handler path invoked on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    /// Queue placement hint; the request-level queue wins when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

/// A registered, immutable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Stable unique name, used as the registry key.
    pub name: String,
    /// Qualified path to the worker-side handler (e.g. `tasks.do_something`).
    pub handler: String,
    /// Declared keyword-only parameter schema.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Execution policy forwarded to the broker with every submission.
    #[serde(default)]
    pub policy: ExecPolicy,
}

/// Why a kwargs bag does not satisfy a descriptor's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KwargsProblem {
    /// The caller supplied a key the schema does not declare.
    UnknownKey(String),
    /// A required key is missing from the caller's kwargs.
    MissingKey(String),
}

impl std::fmt::Display for KwargsProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKey(key) => write!(f, "unknown kwarg '{key}'"),
            Self::MissingKey(key) => write!(f, "missing required kwarg '{key}'"),
        }
    }
}

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A task name was registered twice.
    #[error("task '{0}' is already registered")]
    DuplicateTask(String),
    /// The task name is not in the registry.
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
}

/// The name → descriptor mapping plus the handler resolver it consults.
///
/// Built once at startup via [`TaskRegistry::register`]; wrapped in an
/// `Arc` and shared read-only from then on.
pub struct TaskRegistry {
    tasks: HashMap<String, TaskDescriptor>,
    resolver: Arc<dyn HandlerResolver>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TaskRegistry {
    /// Create an empty registry backed by the given handler resolver.
    #[must_use]
    pub fn new(resolver: Arc<dyn HandlerResolver>) -> Self {
        Self {
            tasks: HashMap::new(),
            resolver,
        }
    }

    /// Register a descriptor. Fails if the name is already taken.
    pub fn register(&mut self, descriptor: TaskDescriptor) -> Result<(), RegistryError> {
        if self.tasks.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTask(descriptor.name));
        }
        tracing::debug!(task = %descriptor.name, handler = %descriptor.handler, "Task registered");
        self.tasks.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Resolve a task name to its descriptor.
    ///
    /// Checks that the backing handler is actually loadable at resolution
    /// time, so a stale registration surfaces as [`RegistryError::Discovery`]
    /// rather than a worker-side import failure.
    pub fn resolve(&self, name: &str) -> Result<&TaskDescriptor, RegistryError> {
        let descriptor = self
            .tasks
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTask(name.to_string()))?;

        if let Err(failure) = self.resolver.resolve(&descriptor.handler) {
            return Err(RegistryError::Discovery {
                name: name.to_string(),
                failure,
            });
        }
        Ok(descriptor)
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All parameters are keyword-only by construction, so this holds for
    /// every descriptor the registry can contain.
    #[must_use]
    pub fn is_keyword_only(_descriptor: &TaskDescriptor) -> bool {
        true
    }

    /// Check a kwargs bag against a descriptor's declared schema.
    ///
    /// Every key must be declared, and every required parameter must be
    /// present. Parameters with defaults may be omitted.
    pub fn kwargs_satisfy(
        descriptor: &TaskDescriptor,
        kwargs: &serde_json::Map<String, Value>,
    ) -> Result<(), KwargsProblem> {
        for key in kwargs.keys() {
            if !descriptor.params.iter().any(|p| &p.name == key) {
                return Err(KwargsProblem::UnknownKey(key.clone()));
            }
        }
        for param in &descriptor.params {
            if param.required && param.default.is_none() && !kwargs.contains_key(&param.name) {
                return Err(KwargsProblem::MissingKey(param.name.clone()));
            }
        }
        Ok(())
    }
}

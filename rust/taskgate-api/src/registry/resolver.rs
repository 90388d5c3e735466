//! Handler resolution - mapping a qualified handler path to loadable code.
//!
//! Workers execute handlers by qualified path. The gateway cannot load that
//! code itself, but it can and does verify the path against a table of
//! handlers the worker deployment exports, so an unresolvable registration
//! fails at validation time instead of at execution time.

use std::collections::HashSet;

/// Typed outcome when a handler path cannot be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveFailure {
    /// No handler with that path exists.
    NotFound,
    /// The handler exists but cannot be loaded (deployment problem).
    LoadError(String),
}

impl std::fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "handler not found"),
            Self::LoadError(reason) => write!(f, "handler failed to load: {reason}"),
        }
    }
}

/// Resolves a qualified handler path, distinguishing not-found from
/// load failure.
///
/// The default implementation is [`StaticResolver`]; plugin-style late
/// binding can provide its own implementation without changing the
/// registry or validator.
pub trait HandlerResolver: Send + Sync {
    /// Check that `handler` resolves to loadable code.
    fn resolve(&self, handler: &str) -> Result<(), ResolveFailure>;
}

/// Resolver backed by a static set of exported handler paths, populated
/// at startup.
#[derive(Debug, Default)]
pub struct StaticResolver {
    handlers: HashSet<String>,
    // Handlers known to exist but marked unloadable, e.g. by a deploy probe.
    broken: HashSet<String>,
}

impl StaticResolver {
    /// Build a resolver from the exported handler paths.
    pub fn new(handlers: impl IntoIterator<Item = String>) -> Self {
        Self {
            handlers: handlers.into_iter().collect(),
            broken: HashSet::new(),
        }
    }

    /// Mark a handler as present but unloadable.
    pub fn mark_broken(&mut self, handler: impl Into<String>, reason: &str) {
        let handler = handler.into();
        tracing::warn!(handler = %handler, reason, "Handler marked unloadable");
        self.handlers.insert(handler.clone());
        self.broken.insert(handler);
    }
}

impl HandlerResolver for StaticResolver {
    fn resolve(&self, handler: &str) -> Result<(), ResolveFailure> {
        if self.broken.contains(handler) {
            return Err(ResolveFailure::LoadError(format!(
                "handler '{handler}' failed its deployment probe"
            )));
        }
        if self.handlers.contains(handler) {
            Ok(())
        } else {
            Err(ResolveFailure::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_handler() {
        let resolver = StaticResolver::new(vec!["tasks.do_something".to_string()]);
        assert!(resolver.resolve("tasks.do_something").is_ok());
    }

    #[test]
    fn unknown_handler_is_not_found() {
        let resolver = StaticResolver::new(vec![]);
        assert_eq!(
            resolver.resolve("tasks.missing").unwrap_err(),
            ResolveFailure::NotFound
        );
    }

    #[test]
    fn broken_handler_is_load_error() {
        let mut resolver = StaticResolver::new(vec![]);
        resolver.mark_broken("tasks.broken", "probe failed");
        assert!(matches!(
            resolver.resolve("tasks.broken").unwrap_err(),
            ResolveFailure::LoadError(_)
        ));
    }
}

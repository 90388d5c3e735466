//! Structured logging helpers.
//!
//! Operation timing and phased-startup logging used by `server.rs` and
//! the broker layer.

use std::time::Instant;

/// Operation timer that logs start and completion with duration.
#[derive(Debug)]
pub struct OpTimer {
    component: String,
    operation: String,
    start: Instant,
}

impl OpTimer {
    /// Start a timer and log the operation start.
    #[must_use]
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        let component = component.into();
        let operation = operation.into();
        tracing::debug!(component = %component, operation = %operation, "Operation started");
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    /// Finish the timer and log the duration.
    pub fn finish(self) {
        tracing::info!(
            component = %self.component,
            operation = %self.operation,
            duration_ms = self.start.elapsed().as_millis(),
            "Operation completed"
        );
    }
}

/// Log one numbered initialization step.
#[macro_export]
macro_rules! log_init_step {
    ($step:expr, $total:expr, $name:expr, $detail:expr) => {
        tracing::info!(
            step = $step,
            total = $total,
            "[{}/{}] {} - {}",
            $step,
            $total,
            $name,
            $detail
        );
    };
    ($step:expr, $total:expr, $name:expr) => {
        tracing::info!(step = $step, total = $total, "[{}/{}] {}", $step, $total, $name);
    };
}

/// Log a warning during initialization.
#[macro_export]
macro_rules! log_init_warning {
    ($msg:expr) => {
        tracing::warn!("{}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        tracing::warn!("{}", format!($msg, $($arg)*));
    };
}

/// Log successful completion of a major phase.
#[macro_export]
macro_rules! log_success {
    ($msg:expr) => {
        tracing::info!("{}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        tracing::info!("{}", format!($msg, $($arg)*));
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_records_component_and_operation() {
        let timer = OpTimer::new("broker", "connection");
        assert_eq!(timer.component, "broker");
        assert_eq!(timer.operation, "connection");
        timer.finish();
    }
}

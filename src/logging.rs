//! The structured logger dependency.
//!
//! The queue core needs `debug/info/warn/error` plus a `with(fields)`
//! scoping method so the worker can attach `job_id`/`queue`/
//! `job_type` once and have every subsequent log line carry them. The
//! handler-level code elsewhere in this codebase calls `tracing::info!`
//! directly; this trait exists so the queue core itself stays decoupled
//! from any one logging backend the way storage and the event bus are.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// A structured logger scoped with zero or more `key=value` fields.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str);

    /// Returns a new logger with `field` merged into its scope. Implementors
    /// should make this cheap — the worker calls it once per job.
    fn with(&self, field: &str, value: &dyn fmt::Display) -> Box<dyn Logger>;

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// The default [`Logger`], backed by `tracing`. Scoping is implemented by
/// accumulating a rendered `key=value, ...` prefix, since `tracing::Span`
/// fields must be declared statically and the queue core attaches fields
/// dynamically (job id, queue name, job type) per invocation.
#[derive(Clone, Default)]
pub struct TracingLogger {
    scope: String,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    fn format(&self, message: &str) -> String {
        if self.scope.is_empty() {
            message.to_string()
        } else {
            format!("{} {}", self.scope, message)
        }
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        let rendered = self.format(message);
        match level {
            Level::Debug => tracing::debug!("{rendered}"),
            Level::Info => tracing::info!("{rendered}"),
            Level::Warn => tracing::warn!("{rendered}"),
            Level::Error => tracing::error!("{rendered}"),
        }
    }

    fn with(&self, field: &str, value: &dyn fmt::Display) -> Box<dyn Logger> {
        let mut scope = self.scope.clone();
        if !scope.is_empty() {
            scope.push(' ');
        }
        scope.push_str(&format!("{field}={value}"));
        Box::new(TracingLogger { scope })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_accumulates_scope_fields() {
        let base = TracingLogger::new();
        let scoped = base.with("job_id", &"abc123").with("queue", &"emails");
        scoped.info("processing");
        // No panic means the formatted scope chain built correctly; the
        // actual rendering is exercised via tracing's own subscriber.
    }
}

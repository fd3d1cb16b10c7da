//! [`JobDefinition`] and the `define_job` builder.

use crate::context::JobContext;
use crate::error::ConfigurationError;
use crate::validation::{AnySchema, Validator};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// The handler invoked once per attempt. Receives a [`JobContext`] (input
/// data, cancellation signal, progress callback, scoped logger) and returns
/// the job's result, or any error implementing [`std::error::Error`].
pub type HandlerFn = Arc<
    dyn Fn(JobContext) -> BoxFuture<'static, Result<Value, anyhow::Error>> + Send + Sync,
>;

/// Queue-level and per-definition defaults merged in at enqueue time, in
/// priority order: call-site [`crate::queue_service::AddOptions`] override
/// these, which override the plugin's queue defaults.
#[derive(Debug, Clone, Default)]
pub struct JobDefaults {
    pub priority: Option<u8>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub metadata: HashMap<String, Value>,
}

/// An immutable, process-lifetime record describing one job kind: a stable
/// `(queue, job_type)` key, the input/output validators, the handler, and
/// optional defaults. Produced by [`define_job`]; never mutated afterwards.
#[derive(Clone)]
pub struct JobDefinition {
    pub queue: String,
    pub job_type: String,
    pub input: Arc<dyn Validator>,
    pub output: Arc<dyn Validator>,
    pub handler: HandlerFn,
    pub defaults: JobDefaults,
}

/// Builder consumed by [`define_job`]: set what you need, leave the rest at
/// their defaults (pass-through validators, no overrides).
pub struct JobDefinitionBuilder {
    queue: String,
    job_type: String,
    input: Arc<dyn Validator>,
    output: Arc<dyn Validator>,
    handler: Option<HandlerFn>,
    defaults: JobDefaults,
}

impl JobDefinitionBuilder {
    pub fn new(queue: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            job_type: job_type.into(),
            input: Arc::new(AnySchema),
            output: Arc::new(AnySchema),
            handler: None,
            defaults: JobDefaults::default(),
        }
    }

    pub fn input(mut self, validator: Arc<dyn Validator>) -> Self {
        self.input = validator;
        self
    }

    pub fn output(mut self, validator: Arc<dyn Validator>) -> Self {
        self.output = validator;
        self
    }

    /// Registers the handler as an `async fn(JobContext) -> Result<Value, E>`
    /// closure. `F` is boxed once at construction time, not per invocation.
    pub fn handler<F, Fut, E>(mut self, f: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<anyhow::Error>,
    {
        self.handler = Some(Arc::new(move |ctx| {
            let fut = f(ctx);
            Box::pin(async move { fut.await.map_err(Into::into) })
        }));
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.defaults.priority = Some(priority);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.defaults.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.defaults.max_retries = Some(max_retries);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<JobDefinition, ConfigurationError> {
        if self.job_type.trim().is_empty() {
            return Err(ConfigurationError::EmptyJobType);
        }
        if self.queue.trim().is_empty() {
            return Err(ConfigurationError::EmptyQueueName);
        }
        let handler = self.handler.ok_or_else(|| ConfigurationError::MissingHandler {
            queue: self.queue.clone(),
            job_type: self.job_type.clone(),
        })?;

        Ok(JobDefinition {
            queue: self.queue,
            job_type: self.job_type,
            input: self.input,
            output: self.output,
            handler,
            defaults: self.defaults,
        })
    }
}

/// Builds an immutable [`JobDefinition`]. Strictly a builder: no runtime
/// side effects, no storage access.
pub fn define_job(queue: impl Into<String>, job_type: impl Into<String>) -> JobDefinitionBuilder {
    JobDefinitionBuilder::new(queue, job_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_handler_fails_configuration() {
        let result = define_job("emails", "email:send").build();
        assert!(matches!(result, Err(ConfigurationError::MissingHandler { .. })));
    }

    #[test]
    fn empty_job_type_fails_configuration() {
        let result = define_job("emails", "")
            .handler(|_ctx| async { Ok::<_, anyhow::Error>(json!({})) })
            .build();
        assert!(matches!(result, Err(ConfigurationError::EmptyJobType)));
    }

    #[test]
    fn well_formed_definition_builds() {
        let definition = define_job("emails", "email:send")
            .priority(7)
            .max_retries(2)
            .handler(|_ctx| async { Ok::<_, anyhow::Error>(json!({"ok": true})) })
            .build()
            .unwrap();
        assert_eq!(definition.queue, "emails");
        assert_eq!(definition.job_type, "email:send");
        assert_eq!(definition.defaults.priority, Some(7));
    }
}

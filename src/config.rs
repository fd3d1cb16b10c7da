//! Queue plugin configuration.
//!
//! `QueuePluginConfig` carries the defaults shared across queues; the
//! storage adapter, event bus and logger are supplied directly to
//! [`crate::QueueServiceBuilder`] rather than folded into this struct, since
//! they are trait objects rather than plain data.

use std::collections::HashMap;
use std::env;

/// Per-queue overrides of the plugin-wide defaults.
#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    pub concurrency: Option<usize>,
    pub default_timeout_ms: Option<u64>,
    pub default_max_retries: Option<u32>,
    pub base_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = Some(max_retries);
        self
    }

    pub fn with_base_backoff_ms(mut self, base_backoff_ms: u64) -> Self {
        self.base_backoff_ms = Some(base_backoff_ms);
        self
    }

    pub fn with_max_backoff_ms(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = Some(max_backoff_ms);
        self
    }
}

/// Plugin-wide configuration.
#[derive(Debug, Clone)]
pub struct QueuePluginConfig {
    pub queues: HashMap<String, QueueConfig>,
    pub default_concurrency: usize,
    pub default_timeout_ms: u64,
    pub default_max_retries: u32,
    pub lease_ttl_ms: u64,
    /// Backoff base, `base * 2^(attempts-1)`.
    pub default_base_backoff_ms: u64,
    pub default_max_backoff_ms: u64,
}

impl Default for QueuePluginConfig {
    fn default() -> Self {
        Self {
            queues: HashMap::new(),
            default_concurrency: 5,
            default_timeout_ms: 30_000,
            default_max_retries: 3,
            lease_ttl_ms: 60_000,
            default_base_backoff_ms: 1_000,
            default_max_backoff_ms: 60_000,
        }
    }
}

impl QueuePluginConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the plugin-wide defaults from the environment, mirroring the
    /// framework's other `*Config::from_env` constructors. Per-queue
    /// overrides and the `queues` map itself are still assembled in code.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("QUEUE_DEFAULT_CONCURRENCY") {
            if let Ok(parsed) = v.parse() {
                config.default_concurrency = parsed;
            }
        }
        if let Ok(v) = env::var("QUEUE_DEFAULT_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse() {
                config.default_timeout_ms = parsed;
            }
        }
        if let Ok(v) = env::var("QUEUE_DEFAULT_MAX_RETRIES") {
            if let Ok(parsed) = v.parse() {
                config.default_max_retries = parsed;
            }
        }
        if let Ok(v) = env::var("QUEUE_LEASE_TTL_MS") {
            if let Ok(parsed) = v.parse() {
                config.lease_ttl_ms = parsed;
            }
        }

        config
    }

    pub fn with_queue(mut self, name: impl Into<String>, queue: QueueConfig) -> Self {
        self.queues.insert(name.into(), queue);
        self
    }

    pub(crate) fn concurrency_for(&self, queue: &str) -> usize {
        self.queues
            .get(queue)
            .and_then(|q| q.concurrency)
            .unwrap_or(self.default_concurrency)
    }

    pub(crate) fn timeout_ms_for(&self, queue: &str) -> u64 {
        self.queues
            .get(queue)
            .and_then(|q| q.default_timeout_ms)
            .unwrap_or(self.default_timeout_ms)
    }

    pub(crate) fn max_retries_for(&self, queue: &str) -> u32 {
        self.queues
            .get(queue)
            .and_then(|q| q.default_max_retries)
            .unwrap_or(self.default_max_retries)
    }

    pub(crate) fn base_backoff_ms_for(&self, queue: &str) -> u64 {
        self.queues
            .get(queue)
            .and_then(|q| q.base_backoff_ms)
            .unwrap_or(self.default_base_backoff_ms)
    }

    pub(crate) fn max_backoff_ms_for(&self, queue: &str) -> u64 {
        self.queues
            .get(queue)
            .and_then(|q| q.max_backoff_ms)
            .unwrap_or(self.default_max_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_queue_override_wins_over_default() {
        let config = QueuePluginConfig::new().with_queue(
            "emails",
            QueueConfig::new().with_concurrency(1).with_default_max_retries(0),
        );

        assert_eq!(config.concurrency_for("emails"), 1);
        assert_eq!(config.max_retries_for("emails"), 0);
        assert_eq!(config.timeout_ms_for("emails"), config.default_timeout_ms);
        assert_eq!(config.concurrency_for("unknown"), config.default_concurrency);
    }
}

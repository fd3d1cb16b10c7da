//! Handler registry: `(queue, job_type) -> JobDefinition`.
//!
//! Built once from the set of [`JobDefinition`]s passed to
//! `QueueServiceBuilder::register`/`register_all` and never mutated after
//! `build()` — the worker only ever reads it.

use crate::error::ConfigurationError;
use crate::job::JobDefinition;
use std::collections::HashMap;

#[derive(Default)]
pub struct Registry {
    definitions: HashMap<(String, String), JobDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `definition`, rejecting a duplicate `(queue, job_type)` pair
    /// rather than silently overwriting an earlier registration.
    pub fn insert(&mut self, definition: JobDefinition) -> Result<(), ConfigurationError> {
        let key = (definition.queue.clone(), definition.job_type.clone());
        if self.definitions.contains_key(&key) {
            return Err(ConfigurationError::DuplicateJobType {
                queue: definition.queue,
                job_type: definition.job_type,
            });
        }
        self.definitions.insert(key, definition);
        Ok(())
    }

    pub fn get(&self, queue: &str, job_type: &str) -> Option<&JobDefinition> {
        self.definitions.get(&(queue.to_string(), job_type.to_string()))
    }

    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<String> =
            self.definitions.keys().map(|(queue, _)| queue.clone()).collect();
        queues.sort();
        queues.dedup();
        queues
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

//! Name-keyed job registry.

use std::collections::HashMap;
use std::sync::Arc;

use courier_core::ConfigError;

use super::definition::JobDefinition;

#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<JobDefinition>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names are unique; a second registration under the same name is rejected.
    pub fn register(&mut self, definition: JobDefinition) -> Result<(), ConfigError> {
        if self.jobs.contains_key(definition.name()) {
            return Err(ConfigError::DuplicateJob(definition.name().to_string()));
        }
        self.jobs
            .insert(definition.name().to_string(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobDefinition>> {
        self.jobs.get(name).cloned()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<JobDefinition>, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::UnknownJob(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.jobs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::definition::handler_fn;

    fn job(name: &str) -> JobDefinition {
        JobDefinition::new(name, handler_fn(|_, _| async { Ok(()) }))
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = JobRegistry::new();
        registry.register(job("a")).unwrap();

        assert_eq!(
            registry.register(job("a")).unwrap_err(),
            ConfigError::DuplicateJob("a".into())
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_names_resolve_to_config_error() {
        let mut registry = JobRegistry::new();
        registry.register(job("b")).unwrap();
        registry.register(job("a")).unwrap();

        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(
            registry.resolve("c").unwrap_err(),
            ConfigError::UnknownJob("c".into())
        );
    }
}

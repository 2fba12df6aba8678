//! Module graph: jobs, services and imports, flattened into an [`Application`].
//!
//! Modules are visited depth-first with a recursion-stack set; the first back
//! edge fails the build with the cycle spelled out (`a -> b -> a`). Imports
//! are flattened before the modules that import them, so an importing module's
//! singletons win on type collisions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use courier_core::ConfigError;

use super::definition::JobDefinition;
use super::registry::JobRegistry;
use super::scope::{Scope, ScopeError, ScopedProvider, ServiceContainer, Services};

/// A named bundle of jobs and service providers.
#[derive(Default)]
pub struct JobModule {
    name: String,
    imports: Vec<String>,
    jobs: Vec<JobDefinition>,
    singletons: Services,
    scoped: Vec<ScopedProvider>,
}

impl core::fmt::Debug for JobModule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobModule")
            .field("name", &self.name)
            .field("imports", &self.imports)
            .field("jobs", &self.jobs)
            .field("singletons", &self.singletons)
            .field("scoped", &self.scoped.len())
            .finish()
    }
}

impl JobModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn import(mut self, module: impl Into<String>) -> Self {
        self.imports.push(module.into());
        self
    }

    pub fn job(mut self, definition: JobDefinition) -> Self {
        self.jobs.push(definition);
        self
    }

    pub fn provide<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.singletons.insert(Arc::new(value));
        self
    }

    pub fn provide_scoped<F>(mut self, provider: F) -> Self
    where
        F: Fn(&mut Scope) -> Result<(), ScopeError> + Send + Sync + 'static,
    {
        self.scoped.push(Arc::new(provider));
        self
    }
}

/// The built registry and container.
#[derive(Debug, Clone, Default)]
pub struct Application {
    pub registry: JobRegistry,
    pub container: ServiceContainer,
}

/// Declared modules, in declaration order.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<JobModule>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, module: JobModule) -> Self {
        self.modules.push(module);
        self
    }

    pub fn push(&mut self, module: JobModule) {
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Validate the graph and flatten it.
    pub fn build(self) -> Result<Application, ConfigError> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, module) in self.modules.iter().enumerate() {
            if index.insert(module.name.as_str(), i).is_some() {
                return Err(ConfigError::DuplicateModule(module.name.clone()));
            }
        }

        for module in &self.modules {
            if let Some(missing) = module
                .imports
                .iter()
                .find(|i| !index.contains_key(i.as_str()))
            {
                return Err(ConfigError::UnknownModule {
                    module: module.name.clone(),
                    import: missing.clone(),
                });
            }
        }

        let order = self.topological_order(&index)?;
        drop(index);

        let mut slots: Vec<Option<JobModule>> = self.modules.into_iter().map(Some).collect();
        let mut app = Application::default();
        for i in order {
            let Some(module) = slots[i].take() else {
                continue;
            };
            for job in module.jobs {
                app.registry.register(job)?;
            }
            app.container.merge(&module.singletons, &module.scoped);
        }
        Ok(app)
    }

    /// Post-order DFS over imports; fails on the first back edge.
    fn topological_order(&self, index: &HashMap<&str, usize>) -> Result<Vec<usize>, ConfigError> {
        let mut done: HashSet<usize> = HashSet::new();
        let mut order = Vec::with_capacity(self.modules.len());

        for root in 0..self.modules.len() {
            let mut stack: Vec<usize> = Vec::new();
            let mut on_stack: HashSet<usize> = HashSet::new();
            self.visit(root, index, &mut stack, &mut on_stack, &mut done, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        node: usize,
        index: &HashMap<&str, usize>,
        stack: &mut Vec<usize>,
        on_stack: &mut HashSet<usize>,
        done: &mut HashSet<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), ConfigError> {
        if done.contains(&node) {
            return Ok(());
        }
        if on_stack.contains(&node) {
            let start = stack.iter().position(|n| *n == node).unwrap_or(0);
            let mut cycle: Vec<String> = stack[start..]
                .iter()
                .map(|n| self.modules[*n].name.clone())
                .collect();
            cycle.push(self.modules[node].name.clone());
            return Err(ConfigError::CircularDependency(cycle));
        }

        stack.push(node);
        on_stack.insert(node);
        for import in &self.modules[node].imports {
            if let Some(&next) = index.get(import.as_str()) {
                self.visit(next, index, stack, on_stack, done, order)?;
            }
        }
        stack.pop();
        on_stack.remove(&node);

        done.insert(node);
        order.push(node);
        Ok(())
    }
}

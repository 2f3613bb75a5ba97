/// Static task registry and dependency partitioner
///
/// The registry is built once at startup and never mutated afterwards. Registration
/// order doubles as execution order for the dependent stage, so a dependency must be
/// registered before any task that declares it.

use crate::sync::task::SyncTask;
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("task '{0}' is already registered")]
    Duplicate(String),
    #[error("task '{task}' depends on '{dependency}', which is not registered before it")]
    UnknownDependency { task: String, dependency: String },
    #[error("unknown task key: {0}")]
    UnknownTask(String),
}

/// A registered task: key, implementation, declared dependency keys
#[derive(Clone)]
pub struct TaskDefinition {
    pub key: String,
    pub task: Arc<dyn SyncTask>,
    pub dependencies: Vec<String>,
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("key", &self.key)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Requested keys split into the two execution stages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Runs first, concurrently
    pub independent: Vec<String>,
    /// Runs afterwards, one at a time in registration order
    pub dependent: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<TaskDefinition>,
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under `key` with its declared dependencies
    pub fn register(
        &mut self,
        key: impl Into<String>,
        task: Arc<dyn SyncTask>,
        dependencies: Vec<String>,
    ) -> Result<(), RegistryError> {
        let key = key.into();
        if self.index.contains_key(&key) {
            return Err(RegistryError::Duplicate(key));
        }
        if let Some(missing) = dependencies.iter().find(|d| !self.index.contains_key(*d)) {
            return Err(RegistryError::UnknownDependency {
                task: key,
                dependency: missing.clone(),
            });
        }

        tracing::debug!("📝 Registered sync task: {} (depends on: {:?})", key, dependencies);
        self.index.insert(key.clone(), self.tasks.len());
        self.tasks.push(TaskDefinition {
            key,
            task,
            dependencies,
        });
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&TaskDefinition> {
        self.index.get(key).map(|&i| &self.tasks[i])
    }

    pub fn definitions(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    /// All keys in registration order
    pub fn keys(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Validate a requested key set and put it in registration order.
    ///
    /// `None` or an empty list selects every registered task. Duplicates collapse.
    pub fn resolve(&self, requested: Option<&[String]>) -> Result<Vec<String>, RegistryError> {
        let requested = match requested {
            Some(keys) if !keys.is_empty() => keys,
            _ => return Ok(self.keys()),
        };

        let mut positions = Vec::with_capacity(requested.len());
        for key in requested {
            let position = *self
                .index
                .get(key)
                .ok_or_else(|| RegistryError::UnknownTask(key.clone()))?;
            positions.push(position);
        }
        positions.sort_unstable();
        positions.dedup();

        Ok(positions.into_iter().map(|i| self.tasks[i].key.clone()).collect())
    }

    /// Split `requested` into independent and dependent groups.
    ///
    /// A task is dependent when one of its declared dependencies is itself requested.
    /// A dependency outside the requested set is assumed satisfied by an earlier run,
    /// so such a task lands in the independent group. Keys the registry does not know
    /// have no declared dependencies and are treated as independent. Input order is
    /// preserved within each group.
    pub fn partition(&self, requested: &[String]) -> Partition {
        let wanted: HashSet<&str> = requested.iter().map(String::as_str).collect();
        let mut partition = Partition::default();

        for key in requested {
            let is_dependent = self
                .get(key)
                .is_some_and(|def| def.dependencies.iter().any(|d| wanted.contains(d.as_str())));

            if is_dependent {
                partition.dependent.push(key.clone());
            } else {
                partition.independent.push(key.clone());
            }
        }

        partition
    }

    /// Declared dependencies of `key` that are part of `requested`
    pub fn requested_dependencies<'a>(&'a self, key: &str, requested: &[String]) -> Vec<&'a str> {
        match self.get(key) {
            Some(def) => def
                .dependencies
                .iter()
                .filter(|d| requested.contains(d))
                .map(String::as_str)
                .collect(),
            None => Vec::new(),
        }
    }
}

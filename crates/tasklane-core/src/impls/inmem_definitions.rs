//! In-memory task definitions and app registry.
//!
//! Both are plain maps behind a tokio `Mutex`. They are seeded from config at
//! startup and used directly by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{AppResource, TaskDefinition};
use crate::ports::{AppResolver, ResolveError, StorageError, TaskDefinitionStore};

#[derive(Default)]
pub struct InMemoryDefinitionStore {
    definitions: Mutex<HashMap<String, TaskDefinition>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definitions(definitions: impl IntoIterator<Item = TaskDefinition>) -> Self {
        let map = definitions
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self {
            definitions: Mutex::new(map),
        }
    }

    /// Definition names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl TaskDefinitionStore for InMemoryDefinitionStore {
    async fn get(&self, name: &str) -> Result<Option<TaskDefinition>, StorageError> {
        Ok(self.definitions.lock().await.get(name).cloned())
    }

    async fn save(&self, definition: TaskDefinition) -> Result<(), StorageError> {
        self.definitions
            .lock()
            .await
            .insert(definition.name.clone(), definition);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.definitions.lock().await.remove(name).is_some())
    }
}

/// Maps app references to launchable resources.
#[derive(Default)]
pub struct InMemoryAppRegistry {
    apps: Mutex<HashMap<String, AppResource>>,
}

impl InMemoryAppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, app_reference: impl Into<String>, resource: AppResource) {
        self.apps.lock().await.insert(app_reference.into(), resource);
    }

    pub async fn unregister(&self, app_reference: &str) -> bool {
        self.apps.lock().await.remove(app_reference).is_some()
    }
}

#[async_trait]
impl AppResolver for InMemoryAppRegistry {
    async fn resolve_resource(&self, app_reference: &str) -> Result<AppResource, ResolveError> {
        self.apps
            .lock()
            .await
            .get(app_reference)
            .cloned()
            .ok_or_else(|| ResolveError::NotRegistered(app_reference.to_string()))
    }
}

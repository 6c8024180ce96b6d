//! TaskDefinitionStore port - タスク定義の正本（外部コラボレータ）

use async_trait::async_trait;

use crate::domain::TaskDefinition;
use crate::ports::StorageError;

#[async_trait]
pub trait TaskDefinitionStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<TaskDefinition>, StorageError>;

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.get(name).await?.is_some())
    }

    /// Insert or replace.
    async fn save(&self, definition: TaskDefinition) -> Result<(), StorageError>;

    /// Returns whether something was removed.
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;
}

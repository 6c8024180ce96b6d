//! TaskValidator - 起動前のタスク定義チェック
//!
//! 起動経路ではレコード作成前に呼ばれるため、ここで返すエラーは副作用を伴いません。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{OrchestrationError, TaskDefinition};
use crate::ports::{AppResolver, TaskDefinitionStore};

/// Result of a full validation: every problem found, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub task_name: String,
    pub app_reference: String,
    pub app_resolvable: bool,
    pub missing_steps: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.app_resolvable && self.missing_steps.is_empty()
    }
}

pub struct TaskValidator {
    definitions: Arc<dyn TaskDefinitionStore>,
    resolver: Arc<dyn AppResolver>,
}

impl TaskValidator {
    pub fn new(definitions: Arc<dyn TaskDefinitionStore>, resolver: Arc<dyn AppResolver>) -> Self {
        Self {
            definitions,
            resolver,
        }
    }

    /// Definition lookup plus composed-step check, as done before a launch.
    pub async fn launchable_definition(&self, task_name: &str) -> Result<TaskDefinition, OrchestrationError> {
        let definition = self
            .definitions
            .get(task_name)
            .await?
            .ok_or_else(|| OrchestrationError::UnknownTask(task_name.to_string()))?;

        let missing = self.missing_steps(&definition).await?;
        if !missing.is_empty() {
            return Err(OrchestrationError::InvalidComposedTask {
                task: task_name.to_string(),
                missing,
            });
        }
        Ok(definition)
    }

    /// Reports on the definition and whether its app can be resolved.
    pub async fn validate(&self, task_name: &str) -> Result<ValidationReport, OrchestrationError> {
        let definition = self
            .definitions
            .get(task_name)
            .await?
            .ok_or_else(|| OrchestrationError::UnknownTask(task_name.to_string()))?;

        let app_resolvable = match self.resolver.resolve_resource(&definition.app_reference).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(task = %task_name, error = %e, "app reference does not resolve");
                false
            }
        };

        Ok(ValidationReport {
            task_name: definition.name.clone(),
            app_reference: definition.app_reference.clone(),
            app_resolvable,
            missing_steps: self.missing_steps(&definition).await?,
        })
    }

    async fn missing_steps(&self, definition: &TaskDefinition) -> Result<Vec<String>, OrchestrationError> {
        let mut missing = Vec::new();
        for step in definition.composed_steps.iter().flatten() {
            if !self.definitions.exists(step).await? {
                missing.push(step.clone());
            }
        }
        Ok(missing)
    }
}

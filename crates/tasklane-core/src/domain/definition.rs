//! Task definitions (what can be launched).
//!
//! Definitions are owned by an external definition store; this layer only
//! reads them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named, launchable task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique name.
    pub name: String,

    /// Reference into the app registry (e.g. "timestamp" or "timestamp:2.1.0").
    pub app_reference: String,

    /// Static properties, merged into every launch.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Step task names when this is a composed task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composed_steps: Option<Vec<String>>,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, app_reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            app_reference: app_reference.into(),
            properties: BTreeMap::new(),
            composed_steps: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn composed_of(mut self, steps: Vec<String>) -> Self {
        self.composed_steps = Some(steps);
        self
    }

    pub fn is_composed(&self) -> bool {
        self.composed_steps.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_without_optional_fields_deserializes() {
        let json = r#"{ "name": "etl-daily", "app_reference": "etl" }"#;
        let def: TaskDefinition = serde_json::from_str(json).expect("deserialize");
        assert_eq!(def.name, "etl-daily");
        assert!(def.properties.is_empty());
        assert!(!def.is_composed());
    }

    #[test]
    fn composed_definition_keeps_step_order() {
        let def = TaskDefinition::new("nightly", "composed-task-runner")
            .composed_of(vec!["extract".into(), "load".into()]);
        assert!(def.is_composed());
        assert_eq!(def.composed_steps.as_deref(), Some(&["extract".to_string(), "load".to_string()][..]));
    }
}

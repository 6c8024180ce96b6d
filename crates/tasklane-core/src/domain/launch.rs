//! Launch request: the immutable, fully-merged input handed to a launcher.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::ExecutionId;

/// Command-line argument carrying the execution id to the launched task.
pub const EXECUTION_ID_ARG: &str = "task.execution-id";

/// App property carrying the callback endpoint.
pub const SERVER_URI_PROPERTY: &str = "task.server-uri";

/// App property carrying a composed task's step graph.
pub const COMPOSED_GRAPH_PROPERTY: &str = "composed-task.graph";

/// Launchable artifact resolved from an app reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppResource {
    /// e.g. "file:/opt/apps/etl.sh", "docker:acme/etl:1.2".
    pub uri: String,
    pub version: Option<String>,
}

impl AppResource {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            version: None,
        }
    }

    /// Path part of a `file:` uri, or the uri itself when it has no scheme.
    pub fn local_path(&self) -> Option<&str> {
        match self.uri.split_once(':') {
            Some(("file", path)) => Some(path),
            Some(_) => None,
            None => Some(&self.uri),
        }
    }
}

/// Who asked for an operation. Recorded on audit records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub actor: String,
}

impl CallerContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self { actor: actor.into() }
    }

    pub fn system() -> Self {
        Self::new("system")
    }
}

impl Default for CallerContext {
    fn default() -> Self {
        Self::system()
    }
}

/// Everything a launcher needs. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub task_name: String,
    pub resource: AppResource,
    pub app_properties: BTreeMap<String, String>,
    pub deployment_properties: BTreeMap<String, String>,
    pub command_line_args: Vec<String>,
    pub execution_id: Option<ExecutionId>,
}

impl LaunchRequest {
    /// Returns a copy carrying the reserved execution id as an argument.
    pub fn with_execution_id(&self, execution_id: ExecutionId) -> Self {
        let mut request = self.clone();
        request
            .command_line_args
            .push(format!("--{}={}", EXECUTION_ID_ARG, execution_id.value()));
        request.execution_id = Some(execution_id);
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_path_of_file_uri() {
        assert_eq!(AppResource::new("file:/bin/sh").local_path(), Some("/bin/sh"));
        assert_eq!(AppResource::new("/bin/sh").local_path(), Some("/bin/sh"));
        assert_eq!(AppResource::new("docker:acme/etl").local_path(), None);
    }

    #[test]
    fn execution_id_is_appended_once() {
        let request = LaunchRequest {
            task_name: "etl".into(),
            resource: AppResource::new("file:/bin/true"),
            app_properties: BTreeMap::new(),
            deployment_properties: BTreeMap::new(),
            command_line_args: vec!["--date=today".into()],
            execution_id: None,
        };
        let stamped = request.with_execution_id(ExecutionId::new(9));
        assert_eq!(
            stamped.command_line_args,
            vec!["--date=today".to_string(), "--task.execution-id=9".to_string()]
        );
        assert_eq!(stamped.execution_id, Some(ExecutionId::new(9)));
        assert!(request.execution_id.is_none());
    }
}

//! Config - TOML 設定の読み込みと組み立て
//!
//! ```toml
//! server_uri = "http://localhost:9393"
//! store_timeout_ms = 5000
//!
//! [common_properties]
//! "app.log.level" = "info"
//!
//! [[platforms]]
//! name = "local"
//! primary = true
//!
//! [[platforms.launchers]]
//! name = "local1"
//! launch_timeout_ms = 30000
//! working_dir = "/var/tmp/tasklane"
//!
//! [apps]
//! etl = "file:/usr/local/bin/etl"
//!
//! [[tasks]]
//! name = "etl-daily"
//! app_reference = "etl"
//! ```
//!
//! platforms を 1 つも書かなければ、launcher `default` を持つ primary の
//! `default` platform が作られます。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::{DEFAULT_STORE_TIMEOUT, PlatformRegistry};
use crate::domain::{
    AppResource, DEFAULT_LAUNCH_TIMEOUT, Launcher, OrchestrationError, TaskDefinition, TaskPlatform,
};
use crate::impls::{InMemoryAppRegistry, InMemoryDefinitionStore, LocalLauncher, local_launcher};

pub const DEFAULT_PLATFORM_NAME: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("platform '{platform}' has unsupported kind '{kind}'")]
    UnsupportedKind { platform: String, kind: String },

    #[error(transparent)]
    Registry(#[from] OrchestrationError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskLaneConfig {
    /// Passed to launched tasks so they can report back.
    #[serde(default)]
    pub server_uri: Option<String>,

    /// Lowest-precedence properties merged into every launch.
    #[serde(default)]
    pub common_properties: BTreeMap<String, String>,

    #[serde(default)]
    pub store_timeout_ms: Option<u64>,

    #[serde(default)]
    pub platforms: Vec<PlatformConfig>,

    /// App reference -> resource URI.
    #[serde(default)]
    pub apps: BTreeMap<String, String>,

    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub launchers: Vec<LauncherConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherConfig {
    pub name: String,
    #[serde(default)]
    pub launch_timeout_ms: Option<u64>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_kind() -> String {
    local_launcher::PLATFORM_TYPE.to_string()
}

impl TaskLaneConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            platforms = config.platforms.len(),
            tasks = config.tasks.len(),
            "config loaded"
        );
        Ok(config)
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_STORE_TIMEOUT)
    }

    /// Builds the launcher registry; fails on the first configuration error.
    pub fn build_registry(&self) -> Result<PlatformRegistry, ConfigError> {
        if self.platforms.is_empty() {
            let launcher = Launcher::new(
                DEFAULT_PLATFORM_NAME,
                local_launcher::PLATFORM_TYPE,
                Arc::new(LocalLauncher::new()),
            );
            let registry = PlatformRegistry::builder()
                .platform(TaskPlatform::new(DEFAULT_PLATFORM_NAME, vec![launcher]).primary())
                .build()?;
            return Ok(registry);
        }

        let mut builder = PlatformRegistry::builder();
        for platform in &self.platforms {
            if platform.kind != local_launcher::PLATFORM_TYPE {
                return Err(ConfigError::UnsupportedKind {
                    platform: platform.name.clone(),
                    kind: platform.kind.clone(),
                });
            }
            let launchers = platform
                .launchers
                .iter()
                .map(|l| {
                    let mut backend = LocalLauncher::new();
                    if let Some(dir) = &l.working_dir {
                        backend = backend.with_working_dir(dir);
                    }
                    let timeout = l
                        .launch_timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(DEFAULT_LAUNCH_TIMEOUT);
                    Launcher::new(&l.name, &platform.kind, Arc::new(backend)).with_launch_timeout(timeout)
                })
                .collect();

            let mut task_platform = TaskPlatform::new(&platform.name, launchers);
            if platform.primary {
                task_platform = task_platform.primary();
            }
            builder = builder.platform(task_platform);
        }
        Ok(builder.build()?)
    }

    pub fn definition_store(&self) -> InMemoryDefinitionStore {
        InMemoryDefinitionStore::with_definitions(self.tasks.iter().cloned())
    }

    pub async fn app_registry(&self) -> InMemoryAppRegistry {
        let registry = InMemoryAppRegistry::new();
        for (reference, uri) in &self.apps {
            registry.register(reference.as_str(), AppResource::new(uri)).await;
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{AppResolver, TaskDefinitionStore};

    const SAMPLE: &str = r#"
server_uri = "http://localhost:9393"
store_timeout_ms = 1500

[common_properties]
"app.log.level" = "info"

[[platforms]]
name = "local"
primary = true

[[platforms.launchers]]
name = "local1"
launch_timeout_ms = 2000
working_dir = "/tmp"

[[platforms.launchers]]
name = "local2"

[apps]
etl = "file:/usr/local/bin/etl"

[[tasks]]
name = "etl-daily"
app_reference = "etl"

[tasks.properties]
"app.batch" = "100"
"#;

    #[test]
    fn sample_parses() {
        let config = TaskLaneConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.server_uri.as_deref(), Some("http://localhost:9393"));
        assert_eq!(config.store_timeout(), Duration::from_millis(1500));
        assert_eq!(config.platforms[0].kind, "local");
        assert_eq!(config.platforms[0].launchers.len(), 2);
        assert_eq!(
            config.tasks[0].properties.get("app.batch").map(String::as_str),
            Some("100")
        );
    }

    #[test]
    fn registry_from_sample() {
        let registry = TaskLaneConfig::from_toml_str(SAMPLE).unwrap().build_registry().unwrap();
        let resolved = registry.resolve_launcher(None).unwrap();
        assert_eq!(resolved.platform_name, "local");
        assert_eq!(resolved.launcher.name, "local1");
        assert_eq!(resolved.launcher.launch_timeout, Duration::from_millis(2000));
        assert_eq!(
            registry.find_launcher("local2").unwrap().launcher.launch_timeout,
            DEFAULT_LAUNCH_TIMEOUT
        );
    }

    #[test]
    fn empty_config_gets_default_platform() {
        let config = TaskLaneConfig::from_toml_str("").unwrap();
        assert_eq!(config.store_timeout(), DEFAULT_STORE_TIMEOUT);
        let registry = config.build_registry().unwrap();
        let resolved = registry.resolve_launcher(None).unwrap();
        assert_eq!(resolved.platform_name, DEFAULT_PLATFORM_NAME);
        assert_eq!(resolved.launcher.name, DEFAULT_PLATFORM_NAME);
    }

    #[test]
    fn unsupported_kind_is_rejected() {
        let config = TaskLaneConfig::from_toml_str(
            r#"
[[platforms]]
name = "k8s"
kind = "kubernetes"

[[platforms.launchers]]
name = "cluster1"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.build_registry(),
            Err(ConfigError::UnsupportedKind { kind, .. }) if kind == "kubernetes"
        ));
    }

    #[test]
    fn duplicate_launcher_fails_startup() {
        let config = TaskLaneConfig::from_toml_str(
            r#"
[[platforms]]
name = "a"
[[platforms.launchers]]
name = "same"

[[platforms]]
name = "b"
[[platforms.launchers]]
name = "same"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.build_registry(),
            Err(ConfigError::Registry(OrchestrationError::DuplicatePlatform(name))) if name == "same"
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = TaskLaneConfig::load("/definitely/not/tasklane.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/tasklane.toml"));
    }

    #[tokio::test]
    async fn seeds_definitions_and_apps() {
        let config = TaskLaneConfig::from_toml_str(SAMPLE).unwrap();
        let definitions = config.definition_store();
        assert!(definitions.exists("etl-daily").await.unwrap());

        let apps = config.app_registry().await;
        let resource = apps.resolve_resource("etl").await.unwrap();
        assert_eq!(resource.uri, "file:/usr/local/bin/etl");
    }
}

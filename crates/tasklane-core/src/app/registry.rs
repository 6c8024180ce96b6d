//! PlatformRegistry - 起動先（launcher）の登録と選択
//!
//! 起動時に一度だけ構築し、以後は読み取り専用で Orchestrator / JobBridge に
//! `Arc` で渡します（グローバルな参照は持たない）。
//!
//! # Fail-fast 設計
//! `PlatformRegistryBuilder::build()` で構成の矛盾をすべて検出します：
//! - platform 名・launcher 名の重複 → `DuplicatePlatform`
//! - launcher を持たない platform、複数の primary → `InvalidPlatformConfiguration`

use std::collections::HashSet;

use crate::domain::{Launcher, OrchestrationError, PlatformSummary, TaskPlatform};

/// A launcher together with the platform it was found on.
#[derive(Debug, Clone)]
pub struct ResolvedLauncher {
    pub platform_name: String,
    pub launcher: Launcher,
}

#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    platforms: Vec<TaskPlatform>,
}

impl PlatformRegistry {
    pub fn builder() -> PlatformRegistryBuilder {
        PlatformRegistryBuilder::new()
    }

    /// Platforms in registration order.
    pub fn list_platforms(&self) -> &[TaskPlatform] {
        &self.platforms
    }

    pub fn summaries(&self) -> Vec<PlatformSummary> {
        self.platforms.iter().map(TaskPlatform::summary).collect()
    }

    /// Picks the launcher for a launch.
    ///
    /// - `None`: the primary platform's first launcher. With no primary, a
    ///   single registered platform is used; otherwise `NoPrimaryPlatform`.
    /// - `Some(name)`: a platform of that name (its first launcher), else a
    ///   launcher of that name, else `UnknownPlatform`.
    pub fn resolve_launcher(
        &self,
        platform_name: Option<&str>,
    ) -> Result<ResolvedLauncher, OrchestrationError> {
        let platform = match platform_name {
            Some(name) => {
                if let Some(platform) = self.platforms.iter().find(|p| p.name == name) {
                    platform
                } else {
                    return self
                        .find_launcher(name)
                        .ok_or_else(|| OrchestrationError::UnknownPlatform(name.to_string()));
                }
            }
            None => self.default_platform()?,
        };

        let launcher = platform.launchers.first().ok_or_else(|| {
            OrchestrationError::InvalidPlatformConfiguration(format!(
                "platform '{}' has no launchers",
                platform.name
            ))
        })?;
        Ok(ResolvedLauncher {
            platform_name: platform.name.clone(),
            launcher: launcher.clone(),
        })
    }

    /// Looks a launcher up by its own name across all platforms.
    pub fn find_launcher(&self, launcher_name: &str) -> Option<ResolvedLauncher> {
        self.platforms.iter().find_map(|platform| {
            platform
                .launchers
                .iter()
                .find(|l| l.name == launcher_name)
                .map(|launcher| ResolvedLauncher {
                    platform_name: platform.name.clone(),
                    launcher: launcher.clone(),
                })
        })
    }

    fn default_platform(&self) -> Result<&TaskPlatform, OrchestrationError> {
        if let Some(primary) = self.platforms.iter().find(|p| p.primary) {
            return Ok(primary);
        }
        match self.platforms.as_slice() {
            [only] => Ok(only),
            platforms => Err(OrchestrationError::NoPrimaryPlatform(
                platforms.iter().map(|p| p.name.clone()).collect(),
            )),
        }
    }
}

pub struct PlatformRegistryBuilder {
    platforms: Vec<TaskPlatform>,
}

impl PlatformRegistryBuilder {
    pub fn new() -> Self {
        Self {
            platforms: Vec::new(),
        }
    }

    pub fn platform(mut self, platform: TaskPlatform) -> Self {
        self.platforms.push(platform);
        self
    }

    pub fn build(self) -> Result<PlatformRegistry, OrchestrationError> {
        let mut platform_names = HashSet::new();
        let mut launcher_names = HashSet::new();
        let mut primaries = Vec::new();

        for platform in &self.platforms {
            if !platform_names.insert(platform.name.as_str()) {
                return Err(OrchestrationError::DuplicatePlatform(platform.name.clone()));
            }
            if platform.launchers.is_empty() {
                return Err(OrchestrationError::InvalidPlatformConfiguration(format!(
                    "platform '{}' has no launchers",
                    platform.name
                )));
            }
            for launcher in &platform.launchers {
                if !launcher_names.insert(launcher.name.as_str()) {
                    return Err(OrchestrationError::DuplicatePlatform(launcher.name.clone()));
                }
            }
            if platform.primary {
                primaries.push(platform.name.clone());
            }
        }

        if primaries.len() > 1 {
            return Err(OrchestrationError::InvalidPlatformConfiguration(format!(
                "more than one primary platform: {primaries:?}"
            )));
        }

        tracing::debug!(
            platforms = self.platforms.len(),
            launchers = launcher_names.len(),
            "platform registry built"
        );
        Ok(PlatformRegistry {
            platforms: self.platforms,
        })
    }
}

impl Default for PlatformRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Launch targets: launchers grouped into platforms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::ports::LauncherBackend;

/// Default bound on a single launcher call.
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A named launch target backed by one launcher backend.
#[derive(Clone)]
pub struct Launcher {
    pub name: String,
    /// Platform type tag ("local", "kubernetes", ...).
    pub platform_type: String,
    pub backend: Arc<dyn LauncherBackend>,
    pub launch_timeout: Duration,
}

impl Launcher {
    pub fn new(
        name: impl Into<String>,
        platform_type: impl Into<String>,
        backend: Arc<dyn LauncherBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            platform_type: platform_type.into(),
            backend,
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
        }
    }

    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }
}

impl fmt::Debug for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Launcher")
            .field("name", &self.name)
            .field("platform_type", &self.platform_type)
            .field("launch_timeout", &self.launch_timeout)
            .finish_non_exhaustive()
    }
}

/// A named group of launchers exposed to callers as one deployment target.
#[derive(Debug, Clone)]
pub struct TaskPlatform {
    pub name: String,
    pub launchers: Vec<Launcher>,
    pub primary: bool,
}

impl TaskPlatform {
    pub fn new(name: impl Into<String>, launchers: Vec<Launcher>) -> Self {
        Self {
            name: name.into(),
            launchers,
            primary: false,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn summary(&self) -> PlatformSummary {
        PlatformSummary {
            name: self.name.clone(),
            primary: self.primary,
            launchers: self
                .launchers
                .iter()
                .map(|l| LauncherSummary {
                    name: l.name.clone(),
                    platform_type: l.platform_type.clone(),
                    launch_timeout_ms: l.launch_timeout.as_millis() as u64,
                })
                .collect(),
        }
    }
}

/// Serializable view of a platform for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSummary {
    pub name: String,
    pub primary: bool,
    pub launchers: Vec<LauncherSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherSummary {
    pub name: String,
    pub platform_type: String,
    pub launch_timeout_ms: u64,
}

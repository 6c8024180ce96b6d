//! AppResolver port - app reference から起動可能なリソースを解決

use async_trait::async_trait;

use crate::domain::AppResource;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no app registered for '{0}'")]
    NotRegistered(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AppResolver: Send + Sync {
    async fn resolve_resource(&self, app_reference: &str) -> Result<AppResource, ResolveError>;
}

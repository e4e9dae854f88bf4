//! Persistence of deployment records.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{Deployment, DeploymentId, PrNumber};

/// The deployment store could not be read or written.
#[derive(Debug, Clone, Error)]
#[error("deployment store unavailable: {0}")]
pub struct StoreError(pub String);

/// Where deployment records and their logs live.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Inserts or replaces a deployment (with its log chunks).
    async fn save(&self, deployment: &Deployment) -> Result<(), StoreError>;

    async fn get(&self, id: &DeploymentId) -> Result<Option<Deployment>, StoreError>;

    /// Deployments of one PR, oldest first.
    async fn list_for_pr(&self, pr: PrNumber) -> Result<Vec<Deployment>, StoreError>;
}

/// Process-local store. Records are lost on restart.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeploymentStore {
    inner: Arc<RwLock<HashMap<DeploymentId, Deployment>>>,
}

impl InMemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for InMemoryDeploymentStore {
    async fn save(&self, deployment: &Deployment) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .insert(deployment.id, deployment.clone());
        Ok(())
    }

    async fn get(&self, id: &DeploymentId) -> Result<Option<Deployment>, StoreError> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn list_for_pr(&self, pr: PrNumber) -> Result<Vec<Deployment>, StoreError> {
        let mut found: Vec<Deployment> = self
            .inner
            .read()
            .await
            .values()
            .filter(|d| d.pr == pr)
            .cloned()
            .collect();
        found.sort_by_key(|d| d.created_at);
        Ok(found)
    }
}

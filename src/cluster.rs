//! # Kubernetes Secrets
//!
//! Thin seam over the Kubernetes Secrets API so the reflector can be driven
//! against an in-memory cluster in tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};
use kube::Client;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("secret rejected: {0}")]
    Rejected(String),
}

/// Read and write access to Secrets in any namespace
#[async_trait]
pub trait SecretTarget: Send + Sync {
    /// The Secret `namespace/name`, or `None` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError>;

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError>;

    /// Full replacement; `secret` carries the resource version it was read at
    async fn replace(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError>;
}

/// [`SecretTarget`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeSecrets {
    client: Client,
}

impl std::fmt::Debug for KubeSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecrets").finish_non_exhaustive()
    }
}

impl KubeSecrets {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn secret_name(secret: &Secret) -> Result<&str, ClusterError> {
    secret
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ClusterError::Rejected("secret has no metadata.name".to_string()))
}

#[async_trait]
impl SecretTarget for KubeSecrets {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        let name = secret_name(secret)?;
        debug!("Creating secret {}/{}", namespace, name);
        Ok(self
            .api(namespace)
            .create(&PostParams::default(), secret)
            .await?)
    }

    async fn replace(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        let name = secret_name(secret)?;
        debug!("Replacing secret {}/{}", namespace, name);
        Ok(self
            .api(namespace)
            .replace(name, &PostParams::default(), secret)
            .await?)
    }
}

//! # GCP Identity
//!
//! `gcp-default` strategy: the GCE metadata server mints an identity token for
//! the instance's default service account, which Vault's GCP auth method
//! exchanges for a Vault token.

use super::{AuthError, Credential};
use crate::constants::{
    DEFAULT_GCE_METADATA_HOST, GCE_DEFAULT_EMAIL_PATH, GCE_DEFAULT_IDENTITY_PATH, GCP_AUTH_PATH,
};
use crate::vault::TokenExchange;
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

/// Read access to the environment's identity service
#[async_trait]
pub trait MetadataService: Send + Sync {
    /// Fetch the text value at `path`, relative to the service root
    async fn query(&self, path: &str, params: &[(&str, &str)]) -> Result<String, AuthError>;
}

/// GCE metadata server client
#[derive(Debug, Clone)]
pub struct GceMetadata {
    http_client: Client,
    base_url: String,
}

impl GceMetadata {
    /// Client for the metadata server, honouring `GCE_METADATA_HOST`
    pub fn from_env() -> Result<Self, reqwest::Error> {
        let host = std::env::var("GCE_METADATA_HOST")
            .unwrap_or_else(|_| DEFAULT_GCE_METADATA_HOST.to_string());
        Self::with_base_url(format!("http://{host}/computeMetadata/v1"))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MetadataService for GceMetadata {
    async fn query(&self, path: &str, params: &[(&str, &str)]) -> Result<String, AuthError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let response = self
            .http_client
            .get(&url)
            .query(params)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| AuthError::IdentityQuery(format!("metadata server unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::IdentityQuery(format!(
                "metadata server returned {status} for {path}: {}",
                body.trim()
            )));
        }

        response
            .text()
            .await
            .map(|body| body.trim().to_string())
            .map_err(|e| AuthError::IdentityQuery(format!("failed to read metadata response: {e}")))
    }
}

/// Audience Vault expects on GCE identity tokens for `role`
#[must_use]
pub fn vault_audience(vault_host: &str, role: &str) -> String {
    format!("{vault_host}/vault/{role}")
}

/// Role named after the local part of the default service account's email
pub async fn role_from_metadata(metadata: &dyn MetadataService) -> Result<String, AuthError> {
    let email = metadata.query(GCE_DEFAULT_EMAIL_PATH, &[]).await?;
    let role = email.split('@').next().unwrap_or_default().trim();
    if role.is_empty() {
        return Err(AuthError::IdentityQuery(format!(
            "default service account email '{email}' has no local part"
        )));
    }
    Ok(role.to_string())
}

pub(super) async fn login(
    metadata: &dyn MetadataService,
    exchange: &dyn TokenExchange,
    role: Option<&str>,
    audience: Option<&str>,
) -> Result<Credential, AuthError> {
    let role = match role {
        Some(role) => role.to_string(),
        None => {
            let role = role_from_metadata(metadata).await?;
            info!("Derived vault role '{}' from the default service account", role);
            role
        }
    };

    let audience = audience.map_or_else(|| vault_audience(exchange.host(), &role), str::to_string);
    debug!("Requesting GCE identity token for audience {}", audience);

    let jwt = metadata
        .query(
            GCE_DEFAULT_IDENTITY_PATH,
            &[("audience", audience.as_str()), ("format", "full")],
        )
        .await?;

    exchange
        .login(GCP_AUTH_PATH, &role, &jwt)
        .await
        .map_err(|source| AuthError::Exchange {
            mount: GCP_AUTH_PATH.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_audience() {
        assert_eq!(
            vault_audience("vault.example.com", "svc-a"),
            "vault.example.com/vault/svc-a"
        );
    }
}

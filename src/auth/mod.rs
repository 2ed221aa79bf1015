//! # Vault Authentication
//!
//! Turns the configured trust mechanism into a Vault token.
//!
//! Three mutually exclusive strategies are supported, selected by `authType`:
//!
//! - `token` - a static token taken verbatim from the configuration
//! - `gcp-default` - a GCE identity token exchanged at `auth/gcp/login`
//! - `kubernetes` - the pod's service-account token exchanged at `{authPath}/login`
//!
//! On success the new [`Credential`] replaces the one installed in the Vault
//! client. On failure the previously installed credential is left in place and
//! the error is returned to the caller.

pub mod gcp;
pub mod kubernetes;

pub use gcp::{GceMetadata, MetadataService};

use crate::config::ConfigError;
use crate::constants::{DEFAULT_KUBERNETES_AUTH_PATH, DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH};
use crate::vault::{StoreError, TokenExchange};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Authentication errors
///
/// These abort the current refresh cycle but never the process.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("error querying environment identity: {0}")]
    IdentityQuery(String),
    #[error("error reading service account token {path}: {source}")]
    TokenRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("error decoding service account token: {0}")]
    TokenDecode(String),
    #[error("error authenticating to vault at {mount}/login: {source}")]
    Exchange {
        mount: String,
        #[source]
        source: StoreError,
    },
}

impl AuthError {
    /// Short label for metrics
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::IdentityQuery(_) => "identity_query",
            AuthError::TokenRead { .. } => "token_read",
            AuthError::TokenDecode(_) => "token_decode",
            AuthError::Exchange { .. } => "exchange",
        }
    }
}

/// A Vault bearer token
///
/// Expiry is governed by Vault and not tracked here. The token is wiped from
/// memory when the credential is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The raw token, for the `X-Vault-Token` header
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Trust mechanism used to obtain a Vault token
#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "authType", rename_all = "kebab-case")]
pub enum AuthStrategy {
    /// Static token from the configuration file
    Token { token: String },
    /// GCE instance identity exchanged with the Vault GCP auth method
    #[serde(rename_all = "camelCase")]
    GcpDefault {
        /// Vault role; derived from the default service account's email when unset
        #[serde(default)]
        role: Option<String>,
        /// Identity token audience; `{vault-host}/vault/{role}` when unset
        #[serde(default)]
        audience: Option<String>,
    },
    /// Pod service-account token exchanged with the Vault Kubernetes auth method
    #[serde(rename_all = "camelCase")]
    Kubernetes {
        /// Vault role; derived from the service-account token when unset
        #[serde(default)]
        role: Option<String>,
        #[serde(default = "default_auth_path")]
        auth_path: String,
        #[serde(default = "default_service_account_token_path")]
        service_account_token_path: PathBuf,
    },
}

fn default_auth_path() -> String {
    DEFAULT_KUBERNETES_AUTH_PATH.to_string()
}

fn default_service_account_token_path() -> PathBuf {
    PathBuf::from(DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH)
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStrategy::Token { .. } => f
                .debug_struct("Token")
                .field("token", &"<redacted>")
                .finish(),
            AuthStrategy::GcpDefault { role, audience } => f
                .debug_struct("GcpDefault")
                .field("role", role)
                .field("audience", audience)
                .finish(),
            AuthStrategy::Kubernetes {
                role,
                auth_path,
                service_account_token_path,
            } => f
                .debug_struct("Kubernetes")
                .field("role", role)
                .field("auth_path", auth_path)
                .field("service_account_token_path", service_account_token_path)
                .finish(),
        }
    }
}

impl AuthStrategy {
    /// Name of the strategy as written in the configuration file
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStrategy::Token { .. } => "token",
            AuthStrategy::GcpDefault { .. } => "gcp-default",
            AuthStrategy::Kubernetes { .. } => "kubernetes",
        }
    }

    /// Startup checks for fields the strategy cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            AuthStrategy::Token { token } if token.trim().is_empty() => Err(
                ConfigError::Invalid("vault.token is required when authType is token".to_string()),
            ),
            AuthStrategy::GcpDefault { role, audience } => {
                reject_blank(role.as_deref(), "vault.role")?;
                reject_blank(audience.as_deref(), "vault.audience")
            }
            AuthStrategy::Kubernetes {
                role, auth_path, ..
            } => {
                reject_blank(role.as_deref(), "vault.role")?;
                if auth_path.trim_matches('/').is_empty() {
                    return Err(ConfigError::Invalid(
                        "vault.authPath cannot be empty".to_string(),
                    ));
                }
                Ok(())
            }
            AuthStrategy::Token { .. } => Ok(()),
        }
    }
}

fn reject_blank(value: Option<&str>, field: &str) -> Result<(), ConfigError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(ConfigError::Invalid(format!(
            "{field} cannot be blank; omit it to derive the value"
        ))),
        _ => Ok(()),
    }
}

/// Obtains credentials for one [`AuthStrategy`] and installs them
pub struct Authenticator {
    strategy: AuthStrategy,
    metadata: Arc<dyn MetadataService>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// `metadata` is only consulted by the `gcp-default` strategy
    pub fn new(strategy: AuthStrategy, metadata: Arc<dyn MetadataService>) -> Self {
        Self { strategy, metadata }
    }

    #[must_use]
    pub fn strategy(&self) -> &AuthStrategy {
        &self.strategy
    }

    /// Obtain a fresh credential without installing it
    pub async fn obtain_credential(
        &self,
        exchange: &dyn TokenExchange,
    ) -> Result<Credential, AuthError> {
        match &self.strategy {
            AuthStrategy::Token { token } => {
                debug!("Using static vault token");
                Ok(Credential::new(token.clone()))
            }
            AuthStrategy::GcpDefault { role, audience } => {
                gcp::login(
                    self.metadata.as_ref(),
                    exchange,
                    role.as_deref(),
                    audience.as_deref(),
                )
                .await
            }
            AuthStrategy::Kubernetes {
                role,
                auth_path,
                service_account_token_path,
            } => {
                kubernetes::login(
                    exchange,
                    role.as_deref(),
                    auth_path,
                    service_account_token_path,
                )
                .await
            }
        }
    }

    /// Obtain a credential and install it into `exchange`
    ///
    /// The installed credential is only replaced on success.
    pub async fn authenticate(&self, exchange: &dyn TokenExchange) -> Result<(), AuthError> {
        let span = info_span!("vault.authenticate", auth.type = self.strategy.as_str());
        async move {
            let credential = self.obtain_credential(exchange).await?;
            exchange.install_credential(credential);
            info!("Installed vault token via {} auth", self.strategy.as_str());
            Ok(())
        }
        .instrument(span)
        .await
    }
}

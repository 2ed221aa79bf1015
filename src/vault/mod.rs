//! # Vault Client
//!
//! Minimal REST client for HashiCorp Vault.
//!
//! Only two operations are needed:
//! - logical reads of KV secrets (`GET /v1/{path}`)
//! - logins against an auth method mount (`POST /v1/{mount}/login`)
//!
//! The client owns the current Vault token. A token is installed by the
//! authenticator and replaced wholesale on every refresh.
//!
//! References:
//! - [Vault HTTP API](https://developer.hashicorp.com/vault/api-docs)

mod requests;
mod responses;

use crate::auth::Credential;
use crate::config::TlsConfig;
use crate::observability::metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

use requests::LoginRequest;
use responses::{ErrorResponse, LoginResponse, SecretResponse};

/// Field name to raw value, as copied into a Kubernetes Secret
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// KV secrets engine version of a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineType {
    /// KV version 1: fields are returned directly under `data`
    Kv,
    /// KV version 2: fields are returned under `data.data`
    #[default]
    KvV2,
}

impl EngineType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Kv => "kv",
            EngineType::KvV2 => "kv-v2",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no secret found at {path}")]
    NotFound { path: String },
    #[error("permission denied on {path}")]
    PermissionDenied { path: String },
    #[error("vault returned {status} for {path}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },
    #[error("vault request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected vault response from {path}: {message}")]
    Decode { path: String, message: String },
    #[error("no vault token installed")]
    MissingCredential,
}

impl StoreError {
    /// Short label for metrics
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::PermissionDenied { .. } => "permission_denied",
            StoreError::Status { .. } => "status",
            StoreError::Transport(_) => "transport",
            StoreError::Decode { .. } => "decode",
            StoreError::MissingCredential => "missing_credential",
        }
    }
}

/// Read access to secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch every field of the secret at `path`
    async fn fetch(&self, path: &str, engine: EngineType) -> Result<SecretData, StoreError>;
}

/// Identity federation against Vault auth methods
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Host part of the Vault address, without scheme or port
    fn host(&self) -> &str;

    /// Exchange an identity assertion at `{mount}/login`
    async fn login(&self, mount: &str, role: &str, jwt: &str) -> Result<Credential, StoreError>;

    /// Replace the token used for subsequent requests
    fn install_credential(&self, credential: Credential);
}

/// Vault REST client
pub struct VaultClient {
    http_client: Client,
    address: Url,
    host: String,
    credential: RwLock<Option<Credential>>,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("address", &self.address.as_str())
            .field("has_credential", &self.has_credential())
            .finish_non_exhaustive()
    }
}

impl VaultClient {
    /// Build a client for `address`; no token is installed yet
    ///
    /// # Errors
    /// Returns an error if the CA bundle cannot be read or the HTTP client
    /// cannot be built
    pub fn new(address: Url, timeout: Duration, tls: Option<&TlsConfig>) -> Result<Self> {
        let host = address
            .host_str()
            .context("Vault address has no host")?
            .to_string();

        let mut builder = Client::builder().timeout(timeout);

        if let Some(tls) = tls {
            if let Some(ca_cert) = &tls.ca_cert {
                for certificate in read_ca_bundle(ca_cert)? {
                    builder = builder.add_root_certificate(certificate);
                }
            }
            if let Some(ca_dir) = &tls.ca_path {
                let entries = std::fs::read_dir(ca_dir).context(format!(
                    "Failed to read Vault CA directory: {}",
                    ca_dir.display()
                ))?;
                let mut files = entries
                    .map(|entry| entry.map(|entry| entry.path()))
                    .collect::<std::io::Result<Vec<_>>>()
                    .context(format!("Failed to list Vault CA directory: {}", ca_dir.display()))?;
                files.retain(|path| path.is_file());
                files.sort();
                for file in files {
                    for certificate in read_ca_bundle(&file)? {
                        builder = builder.add_root_certificate(certificate);
                    }
                }
            }
            if let (Some(cert_path), Some(key_path)) = (&tls.client_cert, &tls.client_key) {
                let mut pem = std::fs::read(cert_path).context(format!(
                    "Failed to read Vault client certificate: {}",
                    cert_path.display()
                ))?;
                pem.push(b'\n');
                pem.extend(std::fs::read(key_path).context(format!(
                    "Failed to read Vault client key: {}",
                    key_path.display()
                ))?);
                let identity = reqwest::Identity::from_pem(&pem)
                    .context("Invalid Vault client certificate or key")?;
                builder = builder.identity(identity);
            }
            if tls.insecure_skip_verify {
                warn!("TLS verification of the Vault server is disabled");
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        let http_client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            address,
            host,
            credential: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn address(&self) -> &Url {
        &self.address
    }

    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn current_token(&self) -> Option<String> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|credential| credential.expose().to_string())
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.address.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn error_from_response(path: &str, response: reqwest::Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => StoreError::NotFound {
                path: path.to_string(),
            },
            StatusCode::FORBIDDEN => StoreError::PermissionDenied {
                path: path.to_string(),
            },
            _ => {
                let errors = serde_json::from_str::<ErrorResponse>(&body)
                    .map(|e| e.errors)
                    .unwrap_or_default();
                let message = if errors.is_empty() {
                    body.trim().to_string()
                } else {
                    errors.join("; ")
                };
                StoreError::Status {
                    path: path.to_string(),
                    status: status.as_u16(),
                    message,
                }
            }
        }
    }

    async fn read(&self, path: &str, engine: EngineType) -> Result<SecretData, StoreError> {
        let token = self.current_token().ok_or(StoreError::MissingCredential)?;

        let response = self
            .http_client
            .get(self.url(path))
            .header("X-Vault-Token", token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(path, response).await);
        }

        let body: SecretResponse = response.json().await.map_err(|e| StoreError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        let data = body.data.ok_or_else(|| StoreError::NotFound {
            path: path.to_string(),
        })?;

        let fields = match engine {
            EngineType::Kv => data,
            EngineType::KvV2 => match data.get("data") {
                Some(serde_json::Value::Object(fields)) => fields.clone(),
                // Deleted or destroyed versions come back with `data: null`
                Some(serde_json::Value::Null) | None => {
                    return Err(StoreError::NotFound {
                        path: path.to_string(),
                    })
                }
                Some(other) => {
                    return Err(StoreError::Decode {
                        path: path.to_string(),
                        message: format!("expected data.data to be an object, got {other}"),
                    })
                }
            },
        };

        Ok(secret_fields(fields))
    }
}

fn read_ca_bundle(path: &Path) -> Result<Vec<reqwest::Certificate>> {
    let pem = std::fs::read(path)
        .context(format!("Failed to read Vault CA bundle: {}", path.display()))?;
    reqwest::Certificate::from_pem_bundle(&pem)
        .context(format!("Invalid PEM in Vault CA bundle: {}", path.display()))
}

/// Convert JSON fields to raw bytes
///
/// Strings are copied as their UTF-8 bytes; any other value is copied as its
/// compact JSON encoding.
#[must_use]
pub fn secret_fields(fields: serde_json::Map<String, serde_json::Value>) -> SecretData {
    fields
        .into_iter()
        .map(|(key, value)| {
            let bytes = match value {
                serde_json::Value::String(s) => s.into_bytes(),
                other => other.to_string().into_bytes(),
            };
            (key, bytes)
        })
        .collect()
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn fetch(&self, path: &str, engine: EngineType) -> Result<SecretData, StoreError> {
        let span = info_span!(
            "vault.secret.read",
            secret.path = path,
            engine = engine.as_str()
        );
        async move {
            let start = Instant::now();
            let result = self.read(path, engine).await;
            metrics::observe_vault_fetch_duration(start.elapsed().as_secs_f64());
            match &result {
                Ok(fields) => debug!("Read {} field(s) from {}", fields.len(), path),
                Err(e) => debug!("Failed to read {}: {}", path, e),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl TokenExchange for VaultClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn login(&self, mount: &str, role: &str, jwt: &str) -> Result<Credential, StoreError> {
        let path = format!("{}/login", mount.trim_matches('/'));
        let response = self
            .http_client
            .post(self.url(&path))
            .json(&LoginRequest { role, jwt })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(&path, response).await);
        }

        let body: LoginResponse = response.json().await.map_err(|e| StoreError::Decode {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let auth = body.auth.ok_or_else(|| StoreError::Decode {
            path: path.clone(),
            message: "login response has no auth block".to_string(),
        })?;
        debug!(
            "Vault login at {} succeeded (lease {}s, renewable: {})",
            path, auth.lease_duration, auth.renewable
        );

        Ok(Credential::new(auth.client_token))
    }

    fn install_credential(&self, credential: Credential) {
        *self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(credential);
    }
}

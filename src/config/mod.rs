//! # Configuration
//!
//! YAML configuration file model for the reflector.
//!
//! ```yaml
//! vault:
//!   url: https://vault.example.com:8200
//!   authType: kubernetes
//!   role: my-role
//! namespace: default
//! label: default
//! daemon: true
//! refreshInterval: 15m
//! mappings:
//!   - vaultPath: secret/data/db
//!     secretName: db-creds
//!     namespace: ns1
//!     keys:
//!       password: password
//! ```
//!
//! Loading is split into [`read_config_file`], [`ReflectorConfig::from_yaml`] and
//! [`ReflectorConfig::validate`] so the binary can exit with a distinct code
//! for each phase.

pub mod validation;

use crate::auth::AuthStrategy;
use crate::constants::{
    DEFAULT_LABEL_VALUE, DEFAULT_LISTEN_ADDRESS, DEFAULT_NAMESPACE, DEFAULT_REFRESH_INTERVAL,
    DEFAULT_SECRET_TYPE, DEFAULT_VAULT_REQUEST_TIMEOUT,
};
use crate::reflector::{KeyProjection, SecretMapping, TargetRef};
use crate::vault::EngineType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use validation::{
    parse_duration, validate_kubernetes_label, validate_kubernetes_name,
    validate_kubernetes_namespace,
};

/// Fatal configuration errors, raised before any cycle runs
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error opening configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("error parsing configuration file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("configuration error: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Process exit code for this failure
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        use crate::constants::exit_codes;
        match self {
            ConfigError::Read { .. } => exit_codes::CONFIG_READ,
            ConfigError::Parse(_) => exit_codes::CONFIG_PARSE,
            ConfigError::Invalid(_) => exit_codes::CONFIG_INVALID,
        }
    }
}

/// Top-level reflector configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectorConfig {
    /// Vault connection and authentication settings
    pub vault: VaultConfig,
    /// Namespace for mappings that do not set their own
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Value of the ownership label stamped on every managed Secret
    #[serde(default = "default_label")]
    pub label: String,
    /// Keep running and refresh on `refreshInterval` instead of exiting after one pass
    #[serde(default)]
    pub daemon: bool,
    /// Refresh interval in daemon mode (e.g. "30s", "15m", "1h")
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,
    /// Address of the metrics and probe server in daemon mode
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Vault path to Secret mappings, reflected in order
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
}

/// Vault connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfig {
    /// Vault address, e.g. `https://vault.example.com:8200`
    pub url: String,
    /// Trust mechanism used to obtain a Vault token, selected by `authType`
    #[serde(flatten)]
    pub auth: AuthStrategy,
    /// Secrets engine assumed for mappings that do not set `vaultEngineType`
    #[serde(default)]
    pub default_engine_type: EngineType,
    /// Per-request timeout for Vault calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// TLS options for the Vault connection
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// PEM bundle of additional trusted CA certificates
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    /// Directory of PEM files, each trusted as a CA
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// PEM client certificate presented for mutual TLS; requires `clientKey`
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    /// Skip server certificate verification (testing only)
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// One Vault path reflected into one Kubernetes Secret
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingConfig {
    pub vault_path: String,
    pub secret_name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub vault_engine_type: Option<EngineType>,
    #[serde(default)]
    pub secret_type: Option<String>,
    /// Source field to target key projection; empty copies every field
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_label() -> String {
    DEFAULT_LABEL_VALUE.to_string()
}

fn default_refresh_interval() -> String {
    DEFAULT_REFRESH_INTERVAL.to_string()
}

fn default_listen_address() -> String {
    DEFAULT_LISTEN_ADDRESS.to_string()
}

fn default_request_timeout() -> String {
    DEFAULT_VAULT_REQUEST_TIMEOUT.to_string()
}

/// Read the raw configuration file
pub fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Read, parse and validate a configuration file in one step
pub fn load(path: &Path) -> Result<ReflectorConfig, ConfigError> {
    let raw = read_config_file(path)?;
    let config = ReflectorConfig::from_yaml(&raw)?;
    config.validate()?;
    Ok(config)
}

impl ReflectorConfig {
    /// Parse a YAML document; defaults are applied by serde
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Validate the configuration
    ///
    /// Everything that can fail at runtime because of a bad value is checked
    /// here so that misconfiguration is fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |e: anyhow::Error| ConfigError::Invalid(format!("{e:#}"));

        self.vault_url()?;
        self.vault.auth.validate()?;
        parse_duration(&self.vault.request_timeout)
            .map_err(|e| invalid(e.context("vault.requestTimeout")))?;
        parse_duration(&self.refresh_interval)
            .map_err(|e| invalid(e.context("refreshInterval")))?;
        self.listen_address
            .parse::<SocketAddr>()
            .map_err(|e| {
                ConfigError::Invalid(format!(
                    "listenAddress '{}' is not a valid socket address: {e}",
                    self.listen_address
                ))
            })?;
        if let Some(tls) = &self.vault.tls {
            if tls.client_cert.is_some() != tls.client_key.is_some() {
                return Err(ConfigError::Invalid(
                    "vault.tls.clientCert and vault.tls.clientKey must be set together"
                        .to_string(),
                ));
            }
        }
        validate_kubernetes_namespace(&self.namespace, "namespace").map_err(invalid)?;
        validate_kubernetes_label(&self.label, "label").map_err(invalid)?;

        let mut targets = HashSet::new();
        for (index, mapping) in self.mappings.iter().enumerate() {
            let field = |name: &str| format!("mappings[{index}].{name}");

            if mapping.vault_path.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{} cannot be empty",
                    field("vaultPath")
                )));
            }
            validate_kubernetes_name(&mapping.secret_name, &field("secretName"))
                .map_err(invalid)?;
            if let Some(namespace) = &mapping.namespace {
                validate_kubernetes_namespace(namespace, &field("namespace")).map_err(invalid)?;
            }
            if let Some((source, _)) = mapping.keys.iter().find(|(_, key)| key.is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "{} maps field '{source}' to an empty key",
                    field("keys")
                )));
            }
            let mut sources_by_key: BTreeMap<&str, &str> = BTreeMap::new();
            for (source, key) in &mapping.keys {
                if let Some(previous) = sources_by_key.insert(key.as_str(), source.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "{} maps '{previous}' and '{source}' to the same key '{key}'",
                        field("keys")
                    )));
                }
            }

            let namespace = mapping.namespace.as_deref().unwrap_or(&self.namespace);
            if !targets.insert((namespace, mapping.secret_name.as_str())) {
                warn!(
                    "mappings[{}] targets {}/{} which is already targeted by an earlier mapping; the later mapping wins",
                    index, namespace, mapping.secret_name
                );
            }
        }

        Ok(())
    }

    /// Parsed Vault address
    pub fn vault_url(&self) -> Result<reqwest::Url, ConfigError> {
        let url = reqwest::Url::parse(&self.vault.url).map_err(|e| {
            ConfigError::Invalid(format!("vault.url '{}' is not a valid URL: {e}", self.vault.url))
        })?;
        if url.host_str().is_none() {
            return Err(ConfigError::Invalid(format!(
                "vault.url '{}' has no host",
                self.vault.url
            )));
        }
        Ok(url)
    }

    /// Refresh interval; falls back to the default when the value is invalid,
    /// which `validate` rejects up front
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        parse_duration(&self.refresh_interval)
            .or_else(|_| parse_duration(DEFAULT_REFRESH_INTERVAL))
            .unwrap_or(Duration::from_secs(900))
    }

    /// Vault request timeout; same fallback rules as [`Self::refresh_interval`]
    #[must_use]
    pub fn vault_request_timeout(&self) -> Duration {
        parse_duration(&self.vault.request_timeout)
            .or_else(|_| parse_duration(DEFAULT_VAULT_REQUEST_TIMEOUT))
            .unwrap_or(Duration::from_secs(30))
    }

    /// Mappings with all defaults resolved, in configured order
    #[must_use]
    pub fn resolved_mappings(&self) -> Vec<SecretMapping> {
        self.mappings
            .iter()
            .map(|mapping| SecretMapping {
                source_path: mapping.vault_path.trim().to_string(),
                engine: mapping
                    .vault_engine_type
                    .unwrap_or(self.vault.default_engine_type),
                target: TargetRef {
                    name: mapping.secret_name.clone(),
                    namespace: mapping
                        .namespace
                        .clone()
                        .unwrap_or_else(|| self.namespace.clone()),
                },
                secret_type: mapping
                    .secret_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SECRET_TYPE.to_string()),
                projection: KeyProjection::from_keys(&mapping.keys),
            })
            .collect()
    }
}

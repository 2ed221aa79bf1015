//! # Constants
//!
//! Shared constants used throughout the reflector.
//!
//! These values represent reasonable defaults and can be overridden via the
//! configuration file where applicable.

/// Label key stamped on every Secret the reflector writes.
/// The label value is the configured `label` (see [`DEFAULT_LABEL_VALUE`]).
pub const OWNERSHIP_LABEL_KEY: &str = "vault-reflector";

/// Default ownership label value
pub const DEFAULT_LABEL_VALUE: &str = "default";

/// Default namespace for mappings that do not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default refresh interval in daemon mode
pub const DEFAULT_REFRESH_INTERVAL: &str = "15m";

/// Default listen address for the metrics and probe server
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:5000";

/// Default Vault HTTP request timeout
pub const DEFAULT_VAULT_REQUEST_TIMEOUT: &str = "30s";

/// Default Kubernetes secret type for newly created targets
pub const DEFAULT_SECRET_TYPE: &str = "Opaque";

/// Default mount path for the Vault Kubernetes auth method
pub const DEFAULT_KUBERNETES_AUTH_PATH: &str = "auth/kubernetes";

/// Mount path for the Vault GCP auth method
pub const GCP_AUTH_PATH: &str = "auth/gcp";

/// Where the kubelet mounts the pod's service-account token
pub const DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Claim carrying the service-account name in legacy service-account tokens
pub const SERVICE_ACCOUNT_NAME_CLAIM: &str = "kubernetes.io/serviceaccount/service-account.name";

/// GCE metadata server host, overridable with `GCE_METADATA_HOST`
pub const DEFAULT_GCE_METADATA_HOST: &str = "metadata.google.internal";

/// Metadata path of the default service account's email address
pub const GCE_DEFAULT_EMAIL_PATH: &str = "instance/service-accounts/default/email";

/// Metadata path of the default service account's identity token endpoint
pub const GCE_DEFAULT_IDENTITY_PATH: &str = "instance/service-accounts/default/identity";

/// Default tracing filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "vault_reflector=info";

/// Process exit codes, one per startup or one-shot phase
pub mod exit_codes {
    pub const INVALID_ARGUMENTS: i32 = 10;
    pub const CONFIG_READ: i32 = 20;
    pub const CONFIG_PARSE: i32 = 21;
    pub const CONFIG_INVALID: i32 = 22;
    pub const VAULT_CLIENT: i32 = 30;
    pub const KUBERNETES_CLIENT: i32 = 31;
    pub const AUTHENTICATION: i32 = 32;
    pub const REFLECTION: i32 = 40;
}

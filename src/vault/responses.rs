//! Response bodies from the Vault REST API

use serde::Deserialize;
use serde_json::{Map, Value};

/// Response of a logical read (`GET /v1/{path}`)
#[derive(Debug, Deserialize)]
pub(crate) struct SecretResponse {
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

/// Response of a login (`POST /v1/{mount}/login`)
#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    #[serde(default)]
    pub auth: Option<AuthInfo>,
}

#[derive(Deserialize)]
pub(crate) struct AuthInfo {
    pub client_token: String,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
}

impl std::fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInfo")
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .finish_non_exhaustive()
    }
}

/// Error body returned with non-2xx statuses
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<String>,
}

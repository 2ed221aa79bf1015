//! Request bodies for the Vault REST API

use serde::Serialize;

/// Body of `POST /v1/{mount}/login` for the GCP and Kubernetes auth methods
#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub role: &'a str,
    pub jwt: &'a str,
}

//! # Kubernetes Identity
//!
//! `kubernetes` strategy: the pod's mounted service-account token is exchanged
//! with Vault's Kubernetes auth method. When no role is configured it is read
//! from the token's own claims.

use super::{AuthError, Credential};
use crate::constants::SERVICE_ACCOUNT_NAME_CLAIM;
use crate::vault::TokenExchange;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use std::path::Path;
use tracing::info;

const LENIENT_PADDING: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT_PADDING);

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT_PADDING);

/// Read the mounted service-account token
pub async fn read_service_account_token(path: &Path) -> Result<String, AuthError> {
    let token = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AuthError::TokenRead {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(token.trim().to_string())
}

/// Service-account name carried in a service-account JWT
///
/// The token must have exactly three dot-separated segments. The payload
/// segment may use either base64 alphabet, padded or not. Legacy tokens carry a
/// flat `kubernetes.io/serviceaccount/service-account.name` claim; projected
/// tokens nest it under `kubernetes.io.serviceaccount.name`.
pub fn role_from_service_account_token(token: &str) -> Result<String, AuthError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::TokenDecode(format!(
            "invalid token format: expected 3 segments, got {}",
            segments.len()
        )));
    }

    let payload = URL_SAFE_LENIENT
        .decode(segments[1])
        .or_else(|_| STANDARD_LENIENT.decode(segments[1]))
        .map_err(|e| AuthError::TokenDecode(format!("payload is not valid base64: {e}")))?;

    let claims: serde_json::Value = serde_json::from_slice(&payload)
        .map_err(|e| AuthError::TokenDecode(format!("payload is not valid JSON: {e}")))?;
    if !claims.is_object() {
        return Err(AuthError::TokenDecode(
            "payload is not a JSON object".to_string(),
        ));
    }

    claims
        .get(SERVICE_ACCOUNT_NAME_CLAIM)
        .or_else(|| claims.pointer("/kubernetes.io/serviceaccount/name"))
        .and_then(serde_json::Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            AuthError::TokenDecode(format!(
                "token has no '{SERVICE_ACCOUNT_NAME_CLAIM}' claim"
            ))
        })
}

pub(super) async fn login(
    exchange: &dyn TokenExchange,
    role: Option<&str>,
    auth_path: &str,
    token_path: &Path,
) -> Result<Credential, AuthError> {
    let jwt = read_service_account_token(token_path).await?;

    let role = match role {
        Some(role) => role.to_string(),
        None => {
            let role = role_from_service_account_token(&jwt)?;
            info!("Derived vault role '{}' from the service account token", role);
            role
        }
    };

    let mount = auth_path.trim_matches('/');
    exchange
        .login(mount, &role, &jwt)
        .await
        .map_err(|source| AuthError::Exchange {
            mount: mount.to_string(),
            source,
        })
}

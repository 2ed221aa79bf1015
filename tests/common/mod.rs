//! Common test utilities
//!
//! Provides rustls setup for tests that talk HTTP, plus in-memory stand-ins
//! for Vault, the Kubernetes API and the GCE metadata server.

#![allow(dead_code, reason = "Each test binary uses a different subset of the helpers")]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use vault_reflector::auth::{AuthError, Credential, MetadataService};
use vault_reflector::cluster::{ClusterError, SecretTarget};
use vault_reflector::vault::{EngineType, SecretData, SecretStore, StoreError, TokenExchange};

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
///
/// Uses a `Once` to ensure it's only called once across all tests.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        // A provider may already be installed by another helper in the same binary
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build a `SecretData` from string pairs
pub fn fields(pairs: &[(&str, &str)]) -> SecretData {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.as_bytes().to_vec()))
        .collect()
}

/// In-memory Vault
#[derive(Default)]
pub struct FakeStore {
    secrets: Mutex<BTreeMap<String, SecretData>>,
    denied: Mutex<HashSet<String>>,
    pub fetches: AtomicUsize,
}

impl FakeStore {
    pub fn with_secret(self, path: &str, data: SecretData) -> Self {
        self.put(path, data);
        self
    }

    pub fn put(&self, path: &str, data: SecretData) {
        self.secrets.lock().unwrap().insert(path.to_string(), data);
    }

    pub fn deny(&self, path: &str) {
        self.denied.lock().unwrap().insert(path.to_string());
    }
}

#[async_trait]
impl SecretStore for FakeStore {
    async fn fetch(&self, path: &str, _engine: EngineType) -> Result<SecretData, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.denied.lock().unwrap().contains(path) {
            return Err(StoreError::PermissionDenied {
                path: path.to_string(),
            });
        }
        self.secrets
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_string(),
            })
    }
}

/// In-memory Kubernetes Secrets API
#[derive(Default)]
pub struct FakeCluster {
    secrets: Mutex<BTreeMap<(String, String), Secret>>,
    rejected: Mutex<HashSet<(String, String)>>,
    resource_version: AtomicUsize,
    pub creates: AtomicUsize,
    pub replaces: AtomicUsize,
}

impl FakeCluster {
    /// Seed an object as if someone else had created it
    pub fn insert(&self, namespace: &str, secret: Secret) {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name), secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Decoded data of `namespace/name`
    pub fn data(&self, namespace: &str, name: &str) -> BTreeMap<String, String> {
        self.secret(namespace, name)
            .and_then(|secret| secret.data)
            .unwrap_or_default()
            .into_iter()
            .map(|(k, ByteString(v))| (k, String::from_utf8(v).unwrap()))
            .collect()
    }

    /// Make every write to `namespace/name` fail
    pub fn reject_writes(&self, namespace: &str, name: &str) {
        self.rejected
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()));
    }

    pub fn writes(&self) -> usize {
        self.creates.load(Ordering::SeqCst) + self.replaces.load(Ordering::SeqCst)
    }

    fn store(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        let name = secret
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClusterError::Rejected("missing name".to_string()))?;
        let key = (namespace.to_string(), name);
        if self.rejected.lock().unwrap().contains(&key) {
            return Err(ClusterError::Rejected(format!(
                "admission webhook denied {}/{}",
                key.0, key.1
            )));
        }
        let mut stored = secret.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(
            (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string(),
        );
        self.secrets.lock().unwrap().insert(key, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl SecretTarget for FakeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        Ok(self.secret(namespace, name))
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.store(namespace, secret)
    }

    async fn replace(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        self.store(namespace, secret)
    }
}

/// In-memory GCE metadata server
#[derive(Default)]
pub struct FakeMetadata {
    values: Mutex<BTreeMap<String, String>>,
    pub queries: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl FakeMetadata {
    pub fn with_value(self, path: &str, value: &str) -> Self {
        self.values
            .lock()
            .unwrap()
            .insert(path.to_string(), value.to_string());
        self
    }

    /// Query parameters of the last request for `path`
    pub fn params_for(&self, path: &str) -> Option<Vec<(String, String)>> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, params)| params.clone())
    }
}

#[async_trait]
impl MetadataService for FakeMetadata {
    async fn query(&self, path: &str, params: &[(&str, &str)]) -> Result<String, AuthError> {
        self.queries.lock().unwrap().push((
            path.to_string(),
            params
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        ));
        self.values
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| AuthError::IdentityQuery(format!("metadata server returned 404 for {path}")))
    }
}

/// Records Vault logins and the installed token
pub struct FakeExchange {
    host: String,
    reject: bool,
    pub logins: Mutex<Vec<(String, String, String)>>,
    pub installed: Mutex<Option<Credential>>,
}

impl FakeExchange {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            reject: false,
            logins: Mutex::new(Vec::new()),
            installed: Mutex::new(None),
        }
    }

    /// Every login is refused with 403
    pub fn rejecting(host: &str) -> Self {
        Self {
            reject: true,
            ..Self::new(host)
        }
    }

    pub fn login_count(&self) -> usize {
        self.logins.lock().unwrap().len()
    }

    pub fn installed_token(&self) -> Option<String> {
        self.installed
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.expose().to_string())
    }
}

#[async_trait]
impl TokenExchange for FakeExchange {
    fn host(&self) -> &str {
        &self.host
    }

    async fn login(&self, mount: &str, role: &str, jwt: &str) -> Result<Credential, StoreError> {
        self.logins
            .lock()
            .unwrap()
            .push((mount.to_string(), role.to_string(), jwt.to_string()));
        if self.reject {
            return Err(StoreError::PermissionDenied {
                path: format!("{mount}/login"),
            });
        }
        Ok(Credential::new(format!("s.{role}")))
    }

    fn install_credential(&self, credential: Credential) {
        *self.installed.lock().unwrap() = Some(credential);
    }
}

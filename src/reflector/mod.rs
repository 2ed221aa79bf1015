//! # Reflection Engine
//!
//! Copies Vault secrets into Kubernetes Secrets, one mapping at a time.
//!
//! For each mapping, in configured order:
//!
//! 1. Fetch the secret at the source path.
//! 2. Project the fetched fields onto target keys.
//! 3. Reconcile the target Secret:
//!    - absent: create it with the projected data and the ownership label
//!    - present and owned: replace its data wholesale (skipped when identical)
//!    - present and not owned: leave it untouched and report a conflict
//!
//! A failing mapping never stops the others. Objects are never deleted.

mod projection;

pub use projection::KeyProjection;

use crate::cluster::{ClusterError, SecretTarget};
use crate::constants::OWNERSHIP_LABEL_KEY;
use crate::observability::metrics;
use crate::vault::{EngineType, SecretData, SecretStore, StoreError};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

/// Namespaced name of a target Secret
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetRef {
    pub name: String,
    pub namespace: String,
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One Vault path reflected into one Secret, with defaults resolved
#[derive(Debug, Clone, PartialEq)]
pub struct SecretMapping {
    pub source_path: String,
    pub engine: EngineType,
    pub target: TargetRef,
    /// Secret type used when the target is created
    pub secret_type: String,
    pub projection: KeyProjection,
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("error fetching secret: {0}")]
    Fetch(#[from] StoreError),
    #[error("field '{field}' not present in secret at {path}")]
    MissingKey { field: String, path: String },
    #[error("secret {namespace}/{name} exists and is not managed by this reflector")]
    OwnershipConflict { namespace: String, name: String },
    #[error("error writing secret: {0}")]
    Write(#[from] ClusterError),
}

impl MappingError {
    /// Short label for metrics
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            MappingError::Fetch(_) => "fetch",
            MappingError::MissingKey { .. } => "missing_key",
            MappingError::OwnershipConflict { .. } => "ownership_conflict",
            MappingError::Write(_) => "write",
        }
    }
}

/// Outcome of a successful mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Created,
    Updated,
    /// Target already held the projected data
    Unchanged,
}

impl Operation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Created => "created",
            Operation::Updated => "updated",
            Operation::Unchanged => "unchanged",
        }
    }
}

/// Counts of successful mappings by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReflectReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl ReflectReport {
    fn record(&mut self, operation: Operation) {
        match operation {
            Operation::Created => self.created += 1,
            Operation::Updated => self.updated += 1,
            Operation::Unchanged => self.unchanged += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

#[derive(Debug)]
pub struct MappingFailure {
    pub source_path: String,
    pub target: TargetRef,
    pub error: MappingError,
}

impl fmt::Display for MappingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.source_path, self.target, self.error)
    }
}

/// At least one mapping failed
///
/// Mappings that succeeded in the same pass have already taken effect.
#[derive(Debug, Error)]
#[error("{}", describe(.failures, .report))]
pub struct ReflectError {
    pub failures: Vec<MappingFailure>,
    pub report: ReflectReport,
}

fn describe(failures: &[MappingFailure], report: &ReflectReport) -> String {
    let rendered = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!(
        "{} of {} mapping(s) failed: {}",
        failures.len(),
        failures.len() + report.total(),
        rendered
    )
}

/// Reconciles mappings from a [`SecretStore`] into a [`SecretTarget`]
pub struct Reflector {
    store: Arc<dyn SecretStore>,
    cluster: Arc<dyn SecretTarget>,
    label: String,
}

impl fmt::Debug for Reflector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reflector")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl Reflector {
    /// `label` is the ownership label value stamped on every written Secret
    pub fn new(
        store: Arc<dyn SecretStore>,
        cluster: Arc<dyn SecretTarget>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cluster,
            label: label.into(),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Reflect every mapping, in order
    pub async fn reflect(&self, mappings: &[SecretMapping]) -> Result<ReflectReport, ReflectError> {
        let mut report = ReflectReport::default();
        let mut failures = Vec::new();

        for mapping in mappings {
            let span = info_span!(
                "reflect.mapping",
                vault.path = %mapping.source_path,
                secret.namespace = %mapping.target.namespace,
                secret.name = %mapping.target.name,
            );
            match self.reflect_one(mapping).instrument(span).await {
                Ok(operation) => {
                    metrics::increment_mappings_reflected(operation.as_str());
                    report.record(operation);
                }
                Err(error) => {
                    warn!(
                        "Failed to reflect {} into {}: {}",
                        mapping.source_path, mapping.target, error
                    );
                    metrics::increment_mapping_errors(error.reason());
                    failures.push(MappingFailure {
                        source_path: mapping.source_path.clone(),
                        target: mapping.target.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            "Reflection finished: {} created, {} updated, {} unchanged, {} failed",
            report.created,
            report.updated,
            report.unchanged,
            failures.len()
        );

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(ReflectError { failures, report })
        }
    }

    async fn reflect_one(&self, mapping: &SecretMapping) -> Result<Operation, MappingError> {
        let fields = self
            .store
            .fetch(&mapping.source_path, mapping.engine)
            .await?;
        let data = to_secret_data(mapping.projection.apply(fields, &mapping.source_path)?);

        let target = &mapping.target;
        match self.cluster.get(&target.namespace, &target.name).await? {
            None => {
                let secret = new_secret(mapping, data, &self.label);
                self.cluster.create(&target.namespace, &secret).await?;
                info!("Created secret {}", target);
                Ok(Operation::Created)
            }
            Some(existing) if !is_owned(&existing, &self.label) => {
                Err(MappingError::OwnershipConflict {
                    namespace: target.namespace.clone(),
                    name: target.name.clone(),
                })
            }
            Some(existing) => {
                let current = existing.data.as_ref();
                if current.map_or(data.is_empty(), |current| *current == data)
                    && existing.string_data.is_none()
                {
                    debug!("Secret {} is up to date", target);
                    return Ok(Operation::Unchanged);
                }
                let secret = replaced_secret(existing, data, &self.label);
                self.cluster.replace(&target.namespace, &secret).await?;
                info!("Updated secret {}", target);
                Ok(Operation::Updated)
            }
        }
    }
}

/// Whether `secret` carries this reflector's ownership label
#[must_use]
pub fn is_owned(secret: &Secret, label: &str) -> bool {
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(OWNERSHIP_LABEL_KEY))
        .is_some_and(|value| value == label)
}

fn to_secret_data(fields: SecretData) -> BTreeMap<String, ByteString> {
    fields
        .into_iter()
        .map(|(key, value)| (key, ByteString(value)))
        .collect()
}

fn new_secret(
    mapping: &SecretMapping,
    data: BTreeMap<String, ByteString>,
    label: &str,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(mapping.target.name.clone()),
            namespace: Some(mapping.target.namespace.clone()),
            labels: Some(BTreeMap::from([(
                OWNERSHIP_LABEL_KEY.to_string(),
                label.to_string(),
            )])),
            ..Default::default()
        },
        data: Some(data),
        type_: Some(mapping.secret_type.clone()),
        ..Default::default()
    }
}

/// Swap the data of an owned Secret, keeping its metadata and type
fn replaced_secret(mut existing: Secret, data: BTreeMap<String, ByteString>, label: &str) -> Secret {
    existing
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(OWNERSHIP_LABEL_KEY.to_string(), label.to_string());
    existing.data = Some(data);
    existing.string_data = None;
    existing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> SecretMapping {
        SecretMapping {
            source_path: "secret/data/db".to_string(),
            engine: EngineType::KvV2,
            target: TargetRef {
                name: "db-creds".to_string(),
                namespace: "ns1".to_string(),
            },
            secret_type: "Opaque".to_string(),
            projection: KeyProjection::All,
        }
    }

    fn data(value: &[u8]) -> BTreeMap<String, ByteString> {
        BTreeMap::from([("password".to_string(), ByteString(value.to_vec()))])
    }

    #[test]
    fn test_new_secret_is_labelled() {
        let secret = new_secret(&mapping(), data(b"s3cr3t"), "default");
        assert!(is_owned(&secret, "default"));
        assert!(!is_owned(&secret, "other"));
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("ns1"));
    }

    #[test]
    fn test_unlabelled_secret_is_not_owned() {
        let secret = Secret::default();
        assert!(!is_owned(&secret, "default"));
    }

    #[test]
    fn test_replace_keeps_metadata() {
        let mut existing = new_secret(&mapping(), data(b"old"), "default");
        existing.metadata.resource_version = Some("42".to_string());
        existing
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .insert("team".to_string(), "db".to_string());
        existing.string_data = Some(BTreeMap::from([("stale".to_string(), "x".to_string())]));

        let replaced = replaced_secret(existing, data(b"new"), "default");
        assert_eq!(replaced.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(replaced.metadata.labels.as_ref().unwrap()["team"], "db");
        assert_eq!(replaced.data, Some(data(b"new")));
        assert!(replaced.string_data.is_none());
        assert!(is_owned(&replaced, "default"));
    }

    #[test]
    fn test_reflect_error_message_lists_failures() {
        let error = ReflectError {
            failures: vec![MappingFailure {
                source_path: "secret/data/missing".to_string(),
                target: mapping().target,
                error: MappingError::Fetch(StoreError::NotFound {
                    path: "secret/data/missing".to_string(),
                }),
            }],
            report: ReflectReport {
                created: 1,
                ..Default::default()
            },
        };
        let message = error.to_string();
        assert!(message.starts_with("1 of 2 mapping(s) failed"), "{message}");
        assert!(message.contains("secret/data/missing -> ns1/db-creds"));
    }
}

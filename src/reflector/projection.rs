//! Key projection from fetched Vault fields to Secret data keys

use super::MappingError;
use crate::vault::SecretData;
use std::collections::BTreeMap;

/// Which fetched fields land in the target Secret, and under which keys
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyProjection {
    /// Every field, under its own name
    #[default]
    All,
    /// Only the listed fields, as `source field -> target key`
    Keys(BTreeMap<String, String>),
}

impl KeyProjection {
    /// An empty map selects every field
    #[must_use]
    pub fn from_keys(keys: &BTreeMap<String, String>) -> Self {
        if keys.is_empty() {
            KeyProjection::All
        } else {
            KeyProjection::Keys(keys.clone())
        }
    }

    /// Project `fields` fetched from `path`
    ///
    /// Every listed field must be present; the first one missing fails the
    /// whole projection.
    pub fn apply(&self, mut fields: SecretData, path: &str) -> Result<SecretData, MappingError> {
        match self {
            KeyProjection::All => Ok(fields),
            KeyProjection::Keys(keys) => keys
                .iter()
                .map(|(field, key)| {
                    fields
                        .remove(field)
                        .map(|value| (key.clone(), value))
                        .ok_or_else(|| MappingError::MissingKey {
                            field: field.clone(),
                            path: path.to_string(),
                        })
                })
                .collect(),
        }
    }
}

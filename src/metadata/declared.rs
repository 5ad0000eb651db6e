//! Statically declared default metadata per event type.
//!
//! Event types carry default key/value pairs (source system, schema
//! version, ...). Instead of discovering them at runtime, they are supplied
//! as plain data keyed by the event's type tag.

use std::collections::HashMap;

use serde::Deserialize;

use super::Metadata;

/// Provider of default metadata for an event type.
pub trait DeclaredMetadata: Send + Sync {
    /// Key/value pairs declared for `type_tag`, in declaration order.
    ///
    /// Unknown tags yield an empty list.
    fn declared_for(&self, type_tag: &str) -> Vec<(String, String)>;
}

/// Mapping from event type tag to its declared default metadata.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct MetadataDeclarations {
    by_type: HashMap<String, Metadata>,
}

impl MetadataDeclarations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `key = value` for `type_tag` (builder form).
    pub fn declare(mut self, type_tag: &str, key: &str, value: impl ToString) -> Self {
        self.insert(type_tag, key, value);
        self
    }

    /// Declare `key = value` for `type_tag`. The first declaration of a key wins.
    pub fn insert(&mut self, type_tag: &str, key: &str, value: impl ToString) {
        self.by_type
            .entry(type_tag.to_string())
            .or_default()
            .insert(key, value);
    }

    /// Parse declarations from YAML of the form `{ TypeTag: { key: value } }`.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Number of event types with declarations.
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl DeclaredMetadata for MetadataDeclarations {
    fn declared_for(&self, type_tag: &str) -> Vec<(String, String)> {
        self.by_type
            .get(type_tag)
            .map(|declared| {
                declared
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

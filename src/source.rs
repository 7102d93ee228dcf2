//! Source objects (ConfigMaps and Secrets) and their content fingerprint.

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies the two kinds of object Reloader reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    ConfigMap,
    Secret,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::ConfigMap => "ConfigMap",
            SourceKind::Secret => "Secret",
        })
    }
}

impl SourceKind {
    /// Lowercase form used in metric labels and the `resourceType` field of
    /// the webhook payload.
    pub fn as_lower(&self) -> &'static str {
        match self {
            SourceKind::ConfigMap => "configmap",
            SourceKind::Secret => "secret",
        }
    }
}

/// A ConfigMap or Secret, reduced to the fields the reload engine needs:
/// identity, data payload, and (for Secrets) its type.
#[derive(Debug, Clone)]
pub struct SourceObject {
    pub kind: SourceKind,
    pub namespace: String,
    pub name: String,
    pub data: BTreeMap<String, Vec<u8>>,
    /// Annotations carried by the source object itself, consulted by the
    /// `search=true` / `match` opt-in policy.
    pub annotations: BTreeMap<String, String>,
}

impl SourceObject {
    pub fn from_configmap(cm: &ConfigMap) -> Self {
        let mut data: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        if let Some(string_data) = &cm.data {
            for (k, v) in string_data {
                data.insert(k.clone(), v.clone().into_bytes());
            }
        }
        if let Some(binary_data) = &cm.binary_data {
            for (k, ByteString(bytes)) in binary_data {
                data.insert(k.clone(), bytes.clone());
            }
        }
        SourceObject {
            kind: SourceKind::ConfigMap,
            namespace: cm.metadata.namespace.clone().unwrap_or_default(),
            name: cm.metadata.name.clone().unwrap_or_default(),
            data,
            annotations: cm.metadata.annotations.clone().unwrap_or_default(),
        }
    }

    pub fn from_secret(secret: &Secret) -> Self {
        let mut data: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        if let Some(raw) = &secret.data {
            for (k, ByteString(bytes)) in raw {
                data.insert(k.clone(), bytes.clone());
            }
        }
        if let Some(string_data) = &secret.string_data {
            for (k, v) in string_data {
                data.insert(k.clone(), v.clone().into_bytes());
            }
        }
        SourceObject {
            kind: SourceKind::Secret,
            namespace: secret.metadata.namespace.clone().unwrap_or_default(),
            name: secret.metadata.name.clone().unwrap_or_default(),
            data,
            annotations: secret.metadata.annotations.clone().unwrap_or_default(),
        }
    }

    pub fn identity(&self) -> (SourceKind, &str, &str) {
        (self.kind, self.namespace.as_str(), self.name.as_str())
    }

    /// Compute the 40-hex-char SHA-1 fingerprint over this object's data.
    /// Entries are sorted by key (guaranteed by `BTreeMap`
    /// iteration order) and rendered `key=value`, raw bytes, joined by `;`.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha1::new();
        for (i, (key, value)) in self.data.iter().enumerate() {
            if i > 0 {
                hasher.update(b";");
            }
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value);
        }
        let digest = hasher.finalize();
        Fingerprint(hex::encode(digest))
    }
}

/// 40-character lowercase hex SHA-1 fingerprint of a source object's data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reconstruct a fingerprint from an already-computed hex digest, e.g.
    /// one read back from the `last-reloaded-fingerprint` pod-template
    /// annotation.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

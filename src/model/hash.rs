//! Attribute hashing for change detection.
//!
//! Provides deterministic hashing of resource declarations to detect
//! changes between runs and enable idempotent plans.

use sha2::{Digest, Sha256};

use super::resource::{AttrValue, ResourceDecl};

/// Hasher for computing resource attribute hashes.
#[derive(Debug, Default)]
pub struct AttrHasher;

impl AttrHasher {
    /// Creates a new attribute hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of a resource declaration.
    ///
    /// Covers identity, kind, attributes, explicit dependencies, and
    /// replace triggers; any change produces a different hash.
    #[must_use]
    pub fn hash_resource(&self, decl: &ResourceDecl) -> String {
        let mut hasher = Sha256::new();

        hasher.update(decl.id.as_bytes());
        hasher.update([0]);
        hasher.update(decl.kind.as_bytes());
        hasher.update([0]);

        // BTreeMap iteration is already sorted by attribute name.
        for (name, value) in &decl.attributes {
            hasher.update(name.as_bytes());
            hasher.update([0]);
            Self::hash_value(&mut hasher, value);
        }

        let mut deps = decl.depends_on.clone();
        deps.sort();
        for dep in deps {
            hasher.update(dep.as_bytes());
            hasher.update([1]);
        }

        let mut triggers = decl.replace_on.clone();
        triggers.sort();
        for trigger in triggers {
            hasher.update(trigger.as_bytes());
            hasher.update([2]);
        }

        hex::encode(hasher.finalize())
    }

    /// Feeds an attribute value into the hasher with type tagging so
    /// that e.g. the string "1" and the integer 1 hash differently.
    fn hash_value(hasher: &mut Sha256, value: &AttrValue) {
        match value {
            AttrValue::String(s) => {
                hasher.update([b's']);
                hasher.update(s.as_bytes());
            }
            AttrValue::Integer(n) => {
                hasher.update([b'i']);
                hasher.update(n.to_be_bytes());
            }
            AttrValue::Bool(b) => {
                hasher.update([b'b', u8::from(*b)]);
            }
            AttrValue::List(items) => {
                hasher.update([b'l']);
                for item in items {
                    Self::hash_value(hasher, item);
                }
            }
        }
        hasher.update([0xff]);
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn create_decl(id: &str) -> ResourceDecl {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            String::from("port"),
            AttrValue::Integer(7860),
        );
        attributes.insert(
            String::from("cidr"),
            AttrValue::String(String::from("0.0.0.0/0")),
        );
        ResourceDecl {
            id: id.to_string(),
            kind: String::from("network-rule"),
            attributes,
            depends_on: vec![],
            replace_on: vec![],
        }
    }

    #[test]
    fn test_hash_deterministic() {
        let hasher = AttrHasher::new();
        let decl = create_decl("web-sg");
        assert_eq!(hasher.hash_resource(&decl), hasher.hash_resource(&decl));
    }

    #[test]
    fn test_different_ids_different_hash() {
        let hasher = AttrHasher::new();
        assert_ne!(
            hasher.hash_resource(&create_decl("web-sg")),
            hasher.hash_resource(&create_decl("ssh-sg"))
        );
    }

    #[test]
    fn test_attribute_change_changes_hash() {
        let hasher = AttrHasher::new();
        let decl = create_decl("web-sg");
        let mut changed = decl.clone();
        changed
            .attributes
            .insert(String::from("port"), AttrValue::Integer(8080));
        assert_ne!(hasher.hash_resource(&decl), hasher.hash_resource(&changed));
    }

    #[test]
    fn test_value_type_matters() {
        let hasher = AttrHasher::new();
        let decl = create_decl("web-sg");
        let mut changed = decl.clone();
        changed
            .attributes
            .insert(String::from("port"), AttrValue::String(String::from("7860")));
        assert_ne!(hasher.hash_resource(&decl), hasher.hash_resource(&changed));
    }

    #[test]
    fn test_short_hash() {
        let short = AttrHasher::short_hash("abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }
}

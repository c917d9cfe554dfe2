//! Resource kind schemas.
//!
//! Each known kind declares which attribute changes force replacement
//! (identity-defining fields) and which output fields the provider
//! produces for it. Unknown kinds are treated as generic: in-place
//! updates unless the manifest lists `replace_on` attributes, and any
//! output name is accepted.

/// Schema for a resource kind.
#[derive(Debug, Clone, Copy)]
pub struct KindSchema {
    /// Kind name as written in manifests.
    pub name: &'static str,
    /// Attribute names whose change requires tear-down and re-create.
    pub replace_on: &'static [&'static str],
    /// Output fields the provider produces, or `None` to accept any.
    pub outputs: Option<&'static [&'static str]>,
}

/// Known resource kinds and their schemas.
pub const KNOWN_KINDS: &[KindSchema] = &[
    KindSchema {
        name: "compute-instance",
        replace_on: &["image", "instance_type", "user_data", "key_pair"],
        outputs: Some(&["id", "public_ip", "private_ip"]),
    },
    KindSchema {
        name: "network-rule",
        replace_on: &[],
        outputs: Some(&["id"]),
    },
    KindSchema {
        name: "identity-role",
        replace_on: &["name"],
        outputs: Some(&["id", "arn"]),
    },
    KindSchema {
        name: "address",
        replace_on: &[],
        outputs: Some(&["id", "public_ip"]),
    },
    KindSchema {
        name: "volume",
        replace_on: &["size_gb", "volume_type"],
        outputs: Some(&["id"]),
    },
];

/// Looks up the schema for a kind.
#[must_use]
pub fn schema_for(kind: &str) -> Option<&'static KindSchema> {
    KNOWN_KINDS.iter().find(|s| s.name == kind)
}

/// Returns true if the kind is not registered and any output name is
/// accepted for it.
#[must_use]
pub fn kind_allows_any_output(kind: &str) -> bool {
    schema_for(kind).is_none_or(|s| s.outputs.is_none())
}

/// Returns true if the kind is known to produce the given output field.
#[must_use]
pub fn kind_output_known(kind: &str, output: &str) -> bool {
    schema_for(kind)
        .and_then(|s| s.outputs)
        .is_some_and(|outputs| outputs.contains(&output))
}

/// Returns true if changing the given attribute on the given kind
/// requires replacement rather than an in-place update.
#[must_use]
pub fn kind_replace_triggers(kind: &str, attribute: &str) -> bool {
    schema_for(kind).is_some_and(|s| s.replace_on.contains(&attribute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_kind_outputs() {
        assert!(kind_output_known("compute-instance", "public_ip"));
        assert!(!kind_output_known("network-rule", "public_ip"));
        assert!(!kind_allows_any_output("network-rule"));
    }

    #[test]
    fn test_unknown_kind_allows_any_output() {
        assert!(kind_allows_any_output("custom-thing"));
        assert!(!kind_output_known("custom-thing", "id"));
    }

    #[test]
    fn test_replace_triggers() {
        assert!(kind_replace_triggers("compute-instance", "image"));
        assert!(!kind_replace_triggers("compute-instance", "tags"));
        assert!(!kind_replace_triggers("network-rule", "port"));
        assert!(!kind_replace_triggers("custom-thing", "anything"));
    }
}

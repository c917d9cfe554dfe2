//! Manifest and resource declaration types.
//!
//! This module defines the structs that map to the `stratus.deploy.yaml`
//! file, the reference expression syntax (`${resource.output}`), and the
//! validated [`ResourceModel`] the rest of the engine consumes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ModelError, Result, StratusError};

use super::kind::{kind_allows_any_output, kind_output_known};

/// The root manifest structure for a Stratus deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Declared resources.
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// State directory path (defaults to `.stratus` beside the manifest).
    #[serde(default)]
    pub path: Option<String>,
}

/// A single declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDecl {
    /// Identifier, unique within the manifest.
    pub id: String,
    /// Resource kind (e.g. `compute-instance`, `network-rule`).
    pub kind: String,
    /// Attribute values. String values may embed `${resource.output}`
    /// references, resolved only after the referenced resource converges.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
    /// Explicit dependencies on other resource identifiers, in addition
    /// to those implied by attribute references.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Attribute names that force replacement when changed, in addition
    /// to the kind's defaults.
    #[serde(default)]
    pub replace_on: Vec<String>,
}

/// An attribute value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AttrValue {
    /// String value (may embed references).
    String(String),
    /// Integer value.
    Integer(i64),
    /// Boolean value.
    Bool(bool),
    /// List of values.
    List(Vec<AttrValue>),
}

/// A reference from one resource's attribute to another resource's output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reference {
    /// Identifier of the referenced resource.
    pub resource: String,
    /// Output field name on the referenced resource.
    pub output: String,
}

/// The validated resource model: a read-only view of resources and their
/// reference edges.
#[derive(Debug)]
pub struct ResourceModel {
    /// Resources keyed by identifier, in identifier order.
    resources: BTreeMap<String, ResourceDecl>,
    /// References per resource identifier.
    references: BTreeMap<String, Vec<Reference>>,
}

impl AttrValue {
    /// Returns the value as a plain string if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Collects every reference embedded in this value.
    pub(crate) fn collect_references(&self, out: &mut Vec<Reference>) -> std::result::Result<(), String> {
        match self {
            Self::String(s) => {
                out.extend(Reference::scan(s)?);
                Ok(())
            }
            Self::List(items) => {
                for item in items {
                    item.collect_references(out)?;
                }
                Ok(())
            }
            Self::Integer(_) | Self::Bool(_) => Ok(()),
        }
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Reference {
    /// Scans a string for `${resource.output}` expressions.
    ///
    /// # Errors
    ///
    /// Returns a message if an expression is unterminated or malformed.
    pub fn scan(s: &str) -> std::result::Result<Vec<Self>, String> {
        let mut refs = Vec::new();
        let mut rest = s;

        while let Some(start) = rest.find("${") {
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(format!("Unterminated reference expression in '{s}'"));
            };

            let expr = &after[..end];
            let Some((resource, output)) = expr.split_once('.') else {
                return Err(format!(
                    "Malformed reference '${{{expr}}}': expected 'resource.output'"
                ));
            };

            if resource.is_empty() || output.is_empty() {
                return Err(format!(
                    "Malformed reference '${{{expr}}}': empty resource or output name"
                ));
            }

            refs.push(Self {
                resource: resource.to_string(),
                output: output.to_string(),
            });
            rest = &after[end + 1..];
        }

        Ok(refs)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.output)
    }
}

impl ResourceDecl {
    /// Collects every reference in this resource's attributes and
    /// `depends_on` entries (the latter as bare dependencies with no
    /// output field).
    ///
    /// # Errors
    ///
    /// Returns a model error if a reference expression is malformed.
    pub fn references(&self) -> Result<Vec<Reference>> {
        let mut refs = Vec::new();
        for value in self.attributes.values() {
            value.collect_references(&mut refs).map_err(|message| {
                StratusError::Model(ModelError::validation(message, format!("{}.attributes", self.id)))
            })?;
        }
        refs.sort();
        refs.dedup();
        Ok(refs)
    }

    /// Returns the set of resource identifiers this resource depends on,
    /// from attribute references and explicit `depends_on` entries.
    ///
    /// # Errors
    ///
    /// Returns a model error if a reference expression is malformed.
    pub fn dependency_ids(&self) -> Result<BTreeSet<String>> {
        let mut ids: BTreeSet<String> = self
            .references()?
            .into_iter()
            .map(|r| r.resource)
            .collect();
        ids.extend(self.depends_on.iter().cloned());
        Ok(ids)
    }
}

impl ResourceModel {
    /// Builds a validated model from a manifest.
    ///
    /// # Errors
    ///
    /// Fails with `DuplicateIdentifier` if two resources share an
    /// identifier, and with `UnknownReference` if an attribute reference
    /// or `depends_on` entry points at a nonexistent resource, at the
    /// resource itself, or at an output field the kind does not produce.
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        let mut resources: BTreeMap<String, ResourceDecl> = BTreeMap::new();

        for decl in &manifest.resources {
            if resources.contains_key(&decl.id) {
                return Err(StratusError::Model(ModelError::DuplicateIdentifier {
                    id: decl.id.clone(),
                }));
            }
            resources.insert(decl.id.clone(), decl.clone());
        }

        let mut references: BTreeMap<String, Vec<Reference>> = BTreeMap::new();

        for decl in resources.values() {
            let refs = decl.references()?;

            for reference in &refs {
                let Some(target) = resources.get(&reference.resource) else {
                    return Err(StratusError::Model(ModelError::UnknownReference {
                        resource: decl.id.clone(),
                        reference: reference.to_string(),
                    }));
                };

                if reference.resource == decl.id {
                    return Err(StratusError::Model(ModelError::UnknownReference {
                        resource: decl.id.clone(),
                        reference: reference.to_string(),
                    }));
                }

                if !kind_allows_any_output(&target.kind)
                    && !kind_output_known(&target.kind, &reference.output)
                {
                    return Err(StratusError::Model(ModelError::UnknownReference {
                        resource: decl.id.clone(),
                        reference: reference.to_string(),
                    }));
                }
            }

            for dep in &decl.depends_on {
                if dep == &decl.id || !resources.contains_key(dep) {
                    return Err(StratusError::Model(ModelError::UnknownReference {
                        resource: decl.id.clone(),
                        reference: dep.clone(),
                    }));
                }
            }

            references.insert(decl.id.clone(), refs);
        }

        Ok(Self {
            resources,
            references,
        })
    }

    /// Returns the resource with the given identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceDecl> {
        self.resources.get(id)
    }

    /// Iterates over resources in identifier order.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceDecl> {
        self.resources.values()
    }

    /// Returns all resource identifiers in order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns the number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if no resources are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Returns the references held by the given resource.
    #[must_use]
    pub fn references_of(&self, id: &str) -> &[Reference] {
        self.references.get(id).map_or(&[], Vec::as_slice)
    }

    /// Returns the dependency identifiers of the given resource
    /// (reference targets plus explicit `depends_on`).
    #[must_use]
    pub fn dependencies_of(&self, id: &str) -> BTreeSet<&str> {
        let mut deps: BTreeSet<&str> = self
            .references_of(id)
            .iter()
            .map(|r| r.resource.as_str())
            .collect();
        if let Some(decl) = self.resources.get(id) {
            deps.extend(decl.depends_on.iter().map(String::as_str));
        }
        deps
    }
}

/// Resolves every reference embedded in a value against recorded outputs.
///
/// The lookup receives `(resource id, output name)` and returns the
/// recorded output value, if any.
///
/// # Errors
///
/// Returns the failing reference rendered as a string if an output is
/// not available.
pub fn resolve_references<F>(value: &AttrValue, lookup: &F) -> std::result::Result<AttrValue, String>
where
    F: Fn(&str, &str) -> Option<String>,
{
    match value {
        AttrValue::String(s) => {
            let mut resolved = String::with_capacity(s.len());
            let mut rest = s.as_str();

            while let Some(start) = rest.find("${") {
                resolved.push_str(&rest[..start]);
                let after = &rest[start + 2..];
                // Scanned at model build time, so the expression is well formed.
                let end = after.find('}').ok_or_else(|| s.clone())?;
                let expr = &after[..end];
                let (resource, output) = expr.split_once('.').ok_or_else(|| s.clone())?;

                let value = lookup(resource, output)
                    .ok_or_else(|| format!("${{{resource}.{output}}}"))?;
                resolved.push_str(&value);
                rest = &after[end + 1..];
            }

            resolved.push_str(rest);
            Ok(AttrValue::String(resolved))
        }
        AttrValue::List(items) => {
            let resolved: std::result::Result<Vec<_>, _> =
                items.iter().map(|v| resolve_references(v, lookup)).collect();
            Ok(AttrValue::List(resolved?))
        }
        AttrValue::Integer(_) | AttrValue::Bool(_) => Ok(value.clone()),
    }
}

fn default_environment() -> String {
    String::from("dev")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(id: &str, kind: &str) -> ResourceDecl {
        ResourceDecl {
            id: id.to_string(),
            kind: kind.to_string(),
            attributes: BTreeMap::new(),
            depends_on: vec![],
            replace_on: vec![],
        }
    }

    fn manifest(resources: Vec<ResourceDecl>) -> Manifest {
        Manifest {
            project: ProjectConfig {
                name: String::from("test"),
                environment: String::from("dev"),
            },
            state: StateConfig::default(),
            resources,
        }
    }

    #[test]
    fn test_reference_scan() {
        let refs = Reference::scan("instance ${net.id} and ${role.arn}").unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].resource, "net");
        assert_eq!(refs[0].output, "id");
        assert_eq!(refs[1].resource, "role");
        assert_eq!(refs[1].output, "arn");
    }

    #[test]
    fn test_reference_scan_plain_string() {
        let refs = Reference::scan("no references here").unwrap();
        assert!(refs.is_empty());
    }

    #[test]
    fn test_reference_scan_malformed() {
        assert!(Reference::scan("${unterminated").is_err());
        assert!(Reference::scan("${no-dot}").is_err());
        assert!(Reference::scan("${.empty}").is_err());
    }

    #[test]
    fn test_duplicate_identifier() {
        let m = manifest(vec![decl("net", "network-rule"), decl("net", "network-rule")]);
        let err = ResourceModel::from_manifest(&m).unwrap_err();
        assert!(matches!(
            err,
            StratusError::Model(ModelError::DuplicateIdentifier { ref id }) if id == "net"
        ));
    }

    #[test]
    fn test_unknown_reference_resource() {
        let mut instance = decl("instance", "compute-instance");
        instance.attributes.insert(
            String::from("security_group"),
            AttrValue::String(String::from("${missing.id}")),
        );
        let m = manifest(vec![instance]);
        let err = ResourceModel::from_manifest(&m).unwrap_err();
        assert!(matches!(
            err,
            StratusError::Model(ModelError::UnknownReference { .. })
        ));
    }

    #[test]
    fn test_unknown_reference_output() {
        let mut instance = decl("instance", "compute-instance");
        instance.attributes.insert(
            String::from("security_group"),
            AttrValue::String(String::from("${net.no_such_output}")),
        );
        let m = manifest(vec![decl("net", "network-rule"), instance]);
        let err = ResourceModel::from_manifest(&m).unwrap_err();
        assert!(matches!(
            err,
            StratusError::Model(ModelError::UnknownReference { .. })
        ));
    }

    #[test]
    fn test_unknown_depends_on() {
        let mut instance = decl("instance", "compute-instance");
        instance.depends_on.push(String::from("missing"));
        let m = manifest(vec![instance]);
        assert!(ResourceModel::from_manifest(&m).is_err());
    }

    #[test]
    fn test_dependencies_merge_refs_and_depends_on() {
        let mut instance = decl("instance", "compute-instance");
        instance.attributes.insert(
            String::from("security_group"),
            AttrValue::String(String::from("${net.id}")),
        );
        instance.depends_on.push(String::from("role"));
        let m = manifest(vec![
            decl("net", "network-rule"),
            decl("role", "identity-role"),
            instance,
        ]);

        let model = ResourceModel::from_manifest(&m).unwrap();
        let deps = model.dependencies_of("instance");
        assert!(deps.contains("net"));
        assert!(deps.contains("role"));
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn test_resolve_references() {
        let value = AttrValue::String(String::from("sg=${net.id} role=${role.arn}"));
        let resolved = resolve_references(&value, &|resource, output| {
            match (resource, output) {
                ("net", "id") => Some(String::from("sg-123")),
                ("role", "arn") => Some(String::from("arn:aws:iam::1:role/demo")),
                _ => None,
            }
        })
        .unwrap();

        assert_eq!(
            resolved.as_str().unwrap(),
            "sg=sg-123 role=arn:aws:iam::1:role/demo"
        );
    }

    #[test]
    fn test_resolve_references_missing_output() {
        let value = AttrValue::String(String::from("${net.id}"));
        let err = resolve_references(&value, &|_, _| None).unwrap_err();
        assert_eq!(err, "${net.id}");
    }
}

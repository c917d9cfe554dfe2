//! Diff engine for comparing desired vs recorded state.
//!
//! Produces one [`ResourceDiff`] per resource: declared resources are
//! compared attribute-by-attribute against their last-applied record,
//! recorded resources no longer declared become deletions.

use std::collections::BTreeSet;
use tracing::debug;

use crate::model::{kind_replace_triggers, AttrHasher, ResourceDecl, ResourceModel};
use crate::state::{ResourceRecord, StateSnapshot};

/// Engine for computing diffs between the model and recorded state.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Attribute hasher.
    hasher: AttrHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource identifier.
    pub id: String,
    /// Resource kind.
    pub kind: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Changed attributes.
    pub details: Vec<DiffDetail>,
    /// Hash recorded at last apply (if any).
    pub old_hash: Option<String>,
    /// Hash of the current declaration (if still declared).
    pub new_hash: Option<String>,
    /// Remote identifier from state (if any).
    pub remote_id: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource can be updated in place.
    Update,
    /// A replace-triggering attribute changed: delete then create.
    Replace,
    /// Resource is no longer declared and must be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Detail about a changed attribute.
#[derive(Debug, Clone)]
pub struct DiffDetail {
    /// Attribute that differs.
    pub field: String,
    /// Last-applied value.
    pub old_value: Option<String>,
    /// Declared value.
    pub new_value: Option<String>,
    /// Whether this change forces replacement.
    pub forces_replace: bool,
}

/// Complete diff result.
#[derive(Debug)]
pub struct DiffResult {
    /// All resource diffs, in identifier order.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: AttrHasher::new(),
        }
    }

    /// Computes the diff between the declared model and recorded state.
    #[must_use]
    pub fn compute_diff(&self, model: &ResourceModel, state: &StateSnapshot) -> DiffResult {
        let mut diffs = Vec::new();

        for decl in model.resources() {
            let new_hash = self.hasher.hash_resource(decl);
            let diff = Self::compute_resource_diff(decl, state.get(&decl.id), &new_hash);
            diffs.push(diff);
        }

        // Recorded resources that are no longer declared.
        for record in state.records() {
            if model.get(&record.id).is_none() {
                debug!("Resource {} removed from manifest", record.id);
                diffs.push(ResourceDiff {
                    id: record.id.clone(),
                    kind: record.kind.clone(),
                    diff_type: DiffType::Delete,
                    details: vec![],
                    old_hash: Some(record.attr_hash.clone()),
                    new_hash: None,
                    remote_id: Some(record.remote_id.clone()),
                });
            }
        }

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        let creates = count(DiffType::Create);
        let updates = count(DiffType::Update);
        let replaces = count(DiffType::Replace);
        let deletes = count(DiffType::Delete);
        let unchanged = count(DiffType::NoChange);

        DiffResult {
            diffs,
            creates,
            updates,
            replaces,
            deletes,
            unchanged,
        }
    }

    /// Computes the diff for a single declared resource.
    fn compute_resource_diff(
        decl: &ResourceDecl,
        record: Option<&ResourceRecord>,
        new_hash: &str,
    ) -> ResourceDiff {
        let Some(record) = record else {
            debug!("Resource {} needs to be created", decl.id);
            return ResourceDiff {
                id: decl.id.clone(),
                kind: decl.kind.clone(),
                diff_type: DiffType::Create,
                details: vec![],
                old_hash: None,
                new_hash: Some(new_hash.to_string()),
                remote_id: None,
            };
        };

        if record.attr_hash == new_hash {
            debug!("Resource {} is up to date", decl.id);
            return ResourceDiff {
                id: decl.id.clone(),
                kind: decl.kind.clone(),
                diff_type: DiffType::NoChange,
                details: vec![],
                old_hash: Some(record.attr_hash.clone()),
                new_hash: Some(new_hash.to_string()),
                remote_id: Some(record.remote_id.clone()),
            };
        }

        let details = Self::compute_detailed_diff(decl, record);

        // A kind change always replaces; otherwise any changed attribute
        // in the replace set does.
        let diff_type = if decl.kind != record.kind || details.iter().any(|d| d.forces_replace) {
            DiffType::Replace
        } else {
            DiffType::Update
        };

        debug!("Resource {} needs {diff_type}", decl.id);
        ResourceDiff {
            id: decl.id.clone(),
            kind: decl.kind.clone(),
            diff_type,
            details,
            old_hash: Some(record.attr_hash.clone()),
            new_hash: Some(new_hash.to_string()),
            remote_id: Some(record.remote_id.clone()),
        }
    }

    /// Computes per-attribute differences between the declaration and the
    /// last-applied record.
    fn compute_detailed_diff(decl: &ResourceDecl, record: &ResourceRecord) -> Vec<DiffDetail> {
        let manifest_triggers: BTreeSet<&str> =
            decl.replace_on.iter().map(String::as_str).collect();

        let mut fields: BTreeSet<&str> = decl.attributes.keys().map(String::as_str).collect();
        fields.extend(record.attributes.keys().map(String::as_str));

        let mut details = Vec::new();
        for field in fields {
            let old = record.attributes.get(field);
            let new = decl.attributes.get(field);
            if old != new {
                details.push(DiffDetail {
                    field: field.to_string(),
                    old_value: old.map(ToString::to_string),
                    new_value: new.map(ToString::to_string),
                    forces_replace: kind_replace_triggers(&decl.kind, field)
                        || manifest_triggers.contains(field),
                });
            }
        }

        details
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.replaces > 0 || self.deletes > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrValue, Manifest, ProjectConfig, StateConfig};

    fn decl(id: &str, kind: &str, attrs: &[(&str, AttrValue)]) -> ResourceDecl {
        ResourceDecl {
            id: id.to_string(),
            kind: kind.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            depends_on: vec![],
            replace_on: vec![],
        }
    }

    fn model(resources: Vec<ResourceDecl>) -> ResourceModel {
        let manifest = Manifest {
            project: ProjectConfig {
                name: String::from("test"),
                environment: String::from("dev"),
            },
            state: StateConfig::default(),
            resources,
        };
        ResourceModel::from_manifest(&manifest).unwrap()
    }

    fn applied_record(decl: &ResourceDecl, remote_id: &str) -> ResourceRecord {
        let hasher = AttrHasher::new();
        let mut record =
            ResourceRecord::new(&decl.id, &decl.kind, remote_id, &hasher.hash_resource(decl));
        record.attributes = decl.attributes.clone();
        record
    }

    #[test]
    fn test_missing_record_is_create() {
        let model = model(vec![decl("net", "network-rule", &[])]);
        let diff = DiffEngine::new().compute_diff(&model, &StateSnapshot::new());

        assert_eq!(diff.creates, 1);
        assert_eq!(diff.diffs[0].diff_type, DiffType::Create);
    }

    #[test]
    fn test_unchanged_is_noop() {
        let net = decl(
            "net",
            "network-rule",
            &[("port", AttrValue::Integer(7860))],
        );
        let state = StateSnapshot::from_records(vec![applied_record(&net, "sg-1")]);
        let model = model(vec![net]);

        let diff = DiffEngine::new().compute_diff(&model, &state);
        assert_eq!(diff.unchanged, 1);
        assert!(!diff.has_changes());
    }

    #[test]
    fn test_mutable_attribute_change_is_update() {
        let old = decl(
            "net",
            "network-rule",
            &[("port", AttrValue::Integer(7860))],
        );
        let state = StateSnapshot::from_records(vec![applied_record(&old, "sg-1")]);

        let new = decl("net", "network-rule", &[("port", AttrValue::Integer(22))]);
        let model = model(vec![new]);

        let diff = DiffEngine::new().compute_diff(&model, &state);
        assert_eq!(diff.updates, 1);
        assert_eq!(diff.diffs[0].diff_type, DiffType::Update);
        assert_eq!(diff.diffs[0].details.len(), 1);
        assert_eq!(diff.diffs[0].details[0].field, "port");
        assert!(!diff.diffs[0].details[0].forces_replace);
    }

    #[test]
    fn test_replace_trigger_change_is_replace() {
        let old = decl(
            "server",
            "compute-instance",
            &[("image", AttrValue::String(String::from("ubuntu-22.04")))],
        );
        let state = StateSnapshot::from_records(vec![applied_record(&old, "i-1")]);

        let new = decl(
            "server",
            "compute-instance",
            &[("image", AttrValue::String(String::from("ubuntu-24.04")))],
        );
        let model = model(vec![new]);

        let diff = DiffEngine::new().compute_diff(&model, &state);
        assert_eq!(diff.replaces, 1);
        assert!(diff.diffs[0].details[0].forces_replace);
    }

    #[test]
    fn test_non_trigger_change_on_kind_with_triggers_is_update() {
        // compute-instance replaces on image changes, but a tags change
        // alone stays in place.
        let old = decl(
            "server",
            "compute-instance",
            &[
                ("image", AttrValue::String(String::from("ubuntu-22.04"))),
                ("tags", AttrValue::String(String::from("team=infra"))),
            ],
        );
        let state = StateSnapshot::from_records(vec![applied_record(&old, "i-1")]);

        let new = decl(
            "server",
            "compute-instance",
            &[
                ("image", AttrValue::String(String::from("ubuntu-22.04"))),
                ("tags", AttrValue::String(String::from("team=platform"))),
            ],
        );
        let model = model(vec![new]);

        let diff = DiffEngine::new().compute_diff(&model, &state);
        assert_eq!(diff.diffs[0].diff_type, DiffType::Update);
        assert_eq!(diff.diffs[0].details.len(), 1);
        assert!(!diff.diffs[0].details[0].forces_replace);
    }

    #[test]
    fn test_manifest_replace_on_extends_kind_defaults() {
        let old = decl(
            "net",
            "network-rule",
            &[("cidr", AttrValue::String(String::from("10.0.0.0/8")))],
        );
        let state = StateSnapshot::from_records(vec![applied_record(&old, "sg-1")]);

        let mut new = decl(
            "net",
            "network-rule",
            &[("cidr", AttrValue::String(String::from("0.0.0.0/0")))],
        );
        new.replace_on.push(String::from("cidr"));
        let model = model(vec![new]);

        let diff = DiffEngine::new().compute_diff(&model, &state);
        assert_eq!(diff.diffs[0].diff_type, DiffType::Replace);
    }

    #[test]
    fn test_undeclared_record_is_delete() {
        let gone = decl("gone", "address", &[]);
        let state = StateSnapshot::from_records(vec![applied_record(&gone, "eip-1")]);
        let model = model(vec![]);

        let diff = DiffEngine::new().compute_diff(&model, &state);
        assert_eq!(diff.deletes, 1);
        assert_eq!(diff.diffs[0].id, "gone");
        assert_eq!(diff.diffs[0].remote_id.as_deref(), Some("eip-1"));
    }

    #[test]
    fn test_kind_change_is_replace() {
        let old = decl("thing", "address", &[]);
        let state = StateSnapshot::from_records(vec![applied_record(&old, "eip-1")]);
        let model = model(vec![decl("thing", "volume", &[])]);

        let diff = DiffEngine::new().compute_diff(&model, &state);
        assert_eq!(diff.diffs[0].diff_type, DiffType::Replace);
    }
}

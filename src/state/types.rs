//! State record types.
//!
//! These types capture the last-applied attributes and produced outputs
//! of each resource, keyed by identifier, for diffing on later runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::AttrValue;

/// Current version of the record format.
pub const STATE_VERSION: &str = "1";

/// Last-applied state of a single resource.
///
/// Created on first successful apply, rewritten after every successful
/// operation on the resource, removed when the resource is deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    /// Record format version.
    pub version: String,
    /// Resource identifier (unique within the project).
    pub id: String,
    /// Resource kind.
    pub kind: String,
    /// Remote identifier returned by the provider.
    pub remote_id: String,
    /// Attribute values as declared when last applied (references
    /// unresolved, exactly as written in the manifest).
    pub attributes: BTreeMap<String, AttrValue>,
    /// Hash of the declaration when last applied.
    pub attr_hash: String,
    /// Outputs produced by the provider.
    pub outputs: BTreeMap<String, String>,
    /// Dependency identifiers at last apply, kept so deletions can be
    /// ordered after the resource is gone from the manifest.
    pub depends_on: BTreeSet<String>,
    /// When the resource was first created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// The last-known state of every resource: the union of record files.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    /// Records keyed by resource identifier.
    records: BTreeMap<String, ResourceRecord>,
}

impl ResourceRecord {
    /// Creates a new record for a freshly created resource.
    #[must_use]
    pub fn new(id: &str, kind: &str, remote_id: &str, attr_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION.to_string(),
            id: id.to_string(),
            kind: kind.to_string(),
            remote_id: remote_id.to_string(),
            attributes: BTreeMap::new(),
            attr_hash: attr_hash.to_string(),
            outputs: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns a recorded output value.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&str> {
        self.outputs.get(name).map(String::as_str)
    }

    /// Records new attributes, hash, and outputs after a successful
    /// update, bumping the update timestamp.
    pub fn record_apply(
        &mut self,
        attributes: BTreeMap<String, AttrValue>,
        attr_hash: &str,
        outputs: BTreeMap<String, String>,
    ) {
        self.attributes = attributes;
        self.attr_hash = attr_hash.to_string();
        self.outputs = outputs;
        self.updated_at = Utc::now();
    }
}

impl StateSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from records.
    #[must_use]
    pub fn from_records(records: Vec<ResourceRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    /// Gets a record by resource identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceRecord> {
        self.records.get(id)
    }

    /// Inserts or replaces a record.
    pub fn set(&mut self, record: ResourceRecord) {
        self.records.insert(record.id.clone(), record);
    }

    /// Removes a record by identifier.
    pub fn remove(&mut self, id: &str) -> Option<ResourceRecord> {
        self.records.remove(id)
    }

    /// Iterates over records in identifier order.
    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.records.values()
    }

    /// Returns all recorded identifiers in order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the recorded dependency edges, used to order deletions
    /// for resources no longer present in the manifest.
    #[must_use]
    pub fn dependency_edges(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.records
            .iter()
            .map(|(id, r)| (id.clone(), r.depends_on.clone()))
            .collect()
    }

    /// Looks up an output across records, for reference resolution.
    #[must_use]
    pub fn lookup_output(&self, resource: &str, output: &str) -> Option<String> {
        self.records
            .get(resource)
            .and_then(|r| r.output(output))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ResourceRecord {
        ResourceRecord::new(id, "network-rule", "sg-123", "hash")
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut snapshot = StateSnapshot::new();
        assert!(snapshot.is_empty());

        snapshot.set(record("net"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("net").unwrap().remote_id, "sg-123");

        snapshot.remove("net");
        assert!(snapshot.get("net").is_none());
    }

    #[test]
    fn test_lookup_output() {
        let mut rec = record("net");
        rec.outputs.insert(String::from("id"), String::from("sg-123"));
        let snapshot = StateSnapshot::from_records(vec![rec]);

        assert_eq!(snapshot.lookup_output("net", "id").as_deref(), Some("sg-123"));
        assert!(snapshot.lookup_output("net", "arn").is_none());
        assert!(snapshot.lookup_output("gone", "id").is_none());
    }

    #[test]
    fn test_record_apply_updates_timestamp() {
        let mut rec = record("net");
        let created = rec.created_at;
        rec.record_apply(
            BTreeMap::new(),
            "new-hash",
            BTreeMap::from([(String::from("id"), String::from("sg-456"))]),
        );
        assert_eq!(rec.attr_hash, "new-hash");
        assert_eq!(rec.output("id"), Some("sg-456"));
        assert_eq!(rec.created_at, created);
        assert!(rec.updated_at >= created);
    }

    #[test]
    fn test_dependency_edges() {
        let mut instance = ResourceRecord::new("instance", "compute-instance", "i-1", "h");
        instance.depends_on.insert(String::from("net"));
        let snapshot = StateSnapshot::from_records(vec![record("net"), instance]);

        let edges = snapshot.dependency_edges();
        assert!(edges["instance"].contains("net"));
        assert!(edges["net"].is_empty());
    }
}

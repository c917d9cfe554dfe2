//! Plan types and construction.
//!
//! Lowers a diff onto the dependency graph as an operation DAG (replace
//! becomes delete-then-create), then linearizes it so the emitted
//! sequence is itself dependency-ordered and deterministic.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, BTreeMap};

use crate::error::{PlanError, Result, StratusError};
use crate::graph::DependencyGraph;
use crate::state::StateSnapshot;

use super::diff::{DiffResult, DiffType};

/// A complete plan: operations in execution order.
///
/// Every operation's `depends_on` indices point at earlier operations,
/// and ties among ready operations are broken lexicographically by
/// resource identifier, so identical inputs produce identical plans.
#[derive(Debug)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Operations in execution order.
    pub operations: Vec<Operation>,
}

/// A single planned operation.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Resource identifier.
    pub resource: String,
    /// Resource kind.
    pub kind: String,
    /// Action to perform.
    pub action: OpAction,
    /// Reason for this operation.
    pub reason: String,
    /// Remote identifier (set for update and delete).
    pub remote_id: Option<String>,
    /// Declaration hash to record on success (create and update).
    pub new_hash: Option<String>,
    /// Whether this operation is one half of a replace.
    pub part_of_replace: bool,
    /// Operation indices that must complete first.
    pub depends_on: Vec<usize>,
}

/// Types of operations in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpAction {
    /// Create the resource.
    Create,
    /// Update the resource in place.
    Update,
    /// Delete the resource.
    Delete,
    /// Nothing to do.
    Noop,
}

impl Plan {
    /// Builds a plan from a diff result.
    ///
    /// Create and update operations wait for their dependencies'
    /// converge operations; delete operations wait for the delete phase
    /// of everything that depends on them (reverse order). A replace is
    /// two operations: its delete obeys the delete ordering, its create
    /// obeys the create ordering and follows the delete.
    ///
    /// # Errors
    ///
    /// Fails with `MissingRemoteId` if a record to update or delete has
    /// no remote identifier, and with `InconsistentOrdering` if the
    /// operation graph cannot be linearized.
    pub fn from_diff(
        diff: &DiffResult,
        graph: &DependencyGraph,
        state: &StateSnapshot,
    ) -> Result<Self> {
        let mut ops: Vec<Operation> = Vec::new();
        let mut converge: BTreeMap<String, usize> = BTreeMap::new();
        let mut delete_phase: BTreeMap<String, usize> = BTreeMap::new();

        for d in &diff.diffs {
            match d.diff_type {
                DiffType::Create => {
                    converge.insert(d.id.clone(), ops.len());
                    ops.push(Operation {
                        resource: d.id.clone(),
                        kind: d.kind.clone(),
                        action: OpAction::Create,
                        reason: String::from("Resource declared in manifest"),
                        remote_id: None,
                        new_hash: d.new_hash.clone(),
                        part_of_replace: false,
                        depends_on: vec![],
                    });
                }
                DiffType::Update => {
                    let remote_id = require_remote_id(&d.id, d.remote_id.as_deref())?;
                    converge.insert(d.id.clone(), ops.len());
                    ops.push(Operation {
                        resource: d.id.clone(),
                        kind: d.kind.clone(),
                        action: OpAction::Update,
                        reason: changed_fields_reason(d),
                        remote_id: Some(remote_id),
                        new_hash: d.new_hash.clone(),
                        part_of_replace: false,
                        depends_on: vec![],
                    });
                }
                DiffType::Replace => {
                    let remote_id = require_remote_id(&d.id, d.remote_id.as_deref())?;
                    let delete_idx = ops.len();
                    delete_phase.insert(d.id.clone(), delete_idx);
                    ops.push(Operation {
                        resource: d.id.clone(),
                        kind: d.kind.clone(),
                        action: OpAction::Delete,
                        reason: format!("Replacing: {}", changed_fields_reason(d)),
                        remote_id: Some(remote_id),
                        new_hash: None,
                        part_of_replace: true,
                        depends_on: vec![],
                    });

                    converge.insert(d.id.clone(), ops.len());
                    ops.push(Operation {
                        resource: d.id.clone(),
                        kind: d.kind.clone(),
                        action: OpAction::Create,
                        reason: format!("Replacing: {}", changed_fields_reason(d)),
                        remote_id: None,
                        new_hash: d.new_hash.clone(),
                        part_of_replace: true,
                        depends_on: vec![delete_idx],
                    });
                }
                DiffType::Delete => {
                    let remote_id = require_remote_id(&d.id, d.remote_id.as_deref())?;
                    delete_phase.insert(d.id.clone(), ops.len());
                    ops.push(Operation {
                        resource: d.id.clone(),
                        kind: d.kind.clone(),
                        action: OpAction::Delete,
                        reason: String::from("Resource removed from manifest"),
                        remote_id: Some(remote_id),
                        new_hash: None,
                        part_of_replace: false,
                        depends_on: vec![],
                    });
                }
                DiffType::NoChange => {
                    converge.insert(d.id.clone(), ops.len());
                    ops.push(Operation {
                        resource: d.id.clone(),
                        kind: d.kind.clone(),
                        action: OpAction::Noop,
                        reason: String::from("Up to date"),
                        remote_id: d.remote_id.clone(),
                        new_hash: d.new_hash.clone(),
                        part_of_replace: false,
                        depends_on: vec![],
                    });
                }
            }
        }

        // Converge edges: an operation that makes a resource available
        // waits for the operations that make its dependencies available.
        for (id, &op_idx) in &converge {
            if let Some(deps) = graph.dependencies_of(id) {
                for dep in deps {
                    if let Some(&dep_idx) = converge.get(dep) {
                        ops[op_idx].depends_on.push(dep_idx);
                    }
                }
            }
        }

        // Delete edges from recorded state: if X depended on D when last
        // applied, D's delete waits for X's delete phase.
        for (id, deps) in &state.dependency_edges() {
            for dep in deps {
                if let (Some(&dep_delete), Some(&id_delete)) =
                    (delete_phase.get(dep), delete_phase.get(id))
                {
                    ops[dep_delete].depends_on.push(id_delete);
                }
            }
        }

        // Delete edges from the model, for replaces where both sides are
        // still declared.
        for (id, &id_delete) in &delete_phase {
            if let Some(dependents) = graph.dependents_of(id) {
                for dependent in dependents {
                    if let Some(&dependent_delete) = delete_phase.get(dependent) {
                        ops[id_delete].depends_on.push(dependent_delete);
                    }
                }
            }
        }

        for op in &mut ops {
            op.depends_on.sort_unstable();
            op.depends_on.dedup();
        }

        Ok(Self {
            created_at: Utc::now(),
            operations: linearize(ops)?,
        })
    }

    /// Builds an all-delete plan from recorded state, in reverse
    /// dependency order.
    ///
    /// # Errors
    ///
    /// Fails with `MissingRemoteId` if a record has no remote identifier,
    /// and with `CyclicDependency` if the recorded edges contain a cycle.
    pub fn destroy(state: &StateSnapshot) -> Result<Self> {
        let edges = state.dependency_edges();
        let graph = DependencyGraph::from_edges(&edges)?;

        let mut ops: Vec<Operation> = Vec::new();
        let mut delete_phase: BTreeMap<String, usize> = BTreeMap::new();

        for record in state.records() {
            let remote_id = require_remote_id(&record.id, Some(&record.remote_id))?;
            delete_phase.insert(record.id.clone(), ops.len());
            ops.push(Operation {
                resource: record.id.clone(),
                kind: record.kind.clone(),
                action: OpAction::Delete,
                reason: String::from("Destroying all resources"),
                remote_id: Some(remote_id),
                new_hash: None,
                part_of_replace: false,
                depends_on: vec![],
            });
        }

        for (id, &id_delete) in &delete_phase {
            if let Some(dependents) = graph.dependents_of(id) {
                for dependent in dependents {
                    if let Some(&dependent_delete) = delete_phase.get(dependent) {
                        ops[id_delete].depends_on.push(dependent_delete);
                    }
                }
            }
        }

        Ok(Self {
            created_at: Utc::now(),
            operations: linearize(ops)?,
        })
    }

    /// Returns true if the plan performs no changes.
    #[must_use]
    pub fn is_changeless(&self) -> bool {
        self.operations
            .iter()
            .all(|op| op.action == OpAction::Noop)
    }

    /// Returns the number of operations, including no-ops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the plan has no operations at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Counts operations with the given action.
    #[must_use]
    pub fn count(&self, action: OpAction) -> usize {
        self.operations
            .iter()
            .filter(|op| op.action == action)
            .count()
    }

    /// Returns operations that can be dispatched immediately.
    #[must_use]
    pub fn ready_operations(&self) -> Vec<&Operation> {
        self.operations
            .iter()
            .filter(|op| op.depends_on.is_empty())
            .collect()
    }

    /// Returns the index of the first operation for a resource, if any.
    #[must_use]
    pub fn position_of(&self, resource: &str, action: OpAction) -> Option<usize> {
        self.operations
            .iter()
            .position(|op| op.resource == resource && op.action == action)
    }
}

/// Validates that a record carries a usable remote identifier.
fn require_remote_id(resource: &str, remote_id: Option<&str>) -> Result<String> {
    match remote_id {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(StratusError::Plan(PlanError::MissingRemoteId {
            resource: resource.to_string(),
        })),
    }
}

/// Renders the changed fields of a diff as an operation reason.
fn changed_fields_reason(d: &super::diff::ResourceDiff) -> String {
    if d.details.is_empty() {
        String::from("Declaration changed")
    } else {
        let fields: Vec<&str> = d.details.iter().map(|det| det.field.as_str()).collect();
        format!("Changed: {}", fields.join(", "))
    }
}

/// Topologically sorts the operations, breaking ties lexicographically by
/// resource identifier, and remaps dependency indices.
fn linearize(ops: Vec<Operation>) -> Result<Vec<Operation>> {
    let n = ops.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![vec![]; n];

    for (i, op) in ops.iter().enumerate() {
        indegree[i] = op.depends_on.len();
        for &dep in &op.depends_on {
            dependents[dep].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<(String, usize)>> = indegree
        .iter()
        .enumerate()
        .filter(|&(_, &count)| count == 0)
        .map(|(i, _)| Reverse((ops[i].resource.clone(), i)))
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse((_, i))) = ready.pop() {
        order.push(i);
        for &j in &dependents[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.push(Reverse((ops[j].resource.clone(), j)));
            }
        }
    }

    if order.len() != n {
        return Err(StratusError::Plan(PlanError::InconsistentOrdering {
            message: format!("Linearized {} of {n} operations", order.len()),
        }));
    }

    let mut new_pos = vec![0usize; n];
    for (pos, &i) in order.iter().enumerate() {
        new_pos[i] = pos;
    }

    let mut slots: Vec<Option<Operation>> = ops.into_iter().map(Some).collect();
    let mut result = Vec::with_capacity(n);
    for &i in &order {
        let Some(mut op) = slots[i].take() else {
            return Err(StratusError::Plan(PlanError::InconsistentOrdering {
                message: String::from("Operation visited twice during linearization"),
            }));
        };
        for dep in &mut op.depends_on {
            *dep = new_pos[*dep];
        }
        op.depends_on.sort_unstable();
        result.push(op);
    }

    Ok(result)
}

impl Operation {
    /// Returns a human-readable description of the operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            OpAction::Create if self.part_of_replace => {
                format!("Create '{}' (replacement)", self.resource)
            }
            OpAction::Delete if self.part_of_replace => {
                format!("Delete '{}' (being replaced)", self.resource)
            }
            OpAction::Create => format!("Create '{}'", self.resource),
            OpAction::Update => format!("Update '{}'", self.resource),
            OpAction::Delete => format!("Delete '{}'", self.resource),
            OpAction::Noop => format!("No change for '{}'", self.resource),
        }
    }
}

impl std::fmt::Display for OpAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Noop => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} [{}]", self.action, self.resource, self.kind)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_changeless() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} operations):", self.operations.len())?;
        for (i, op) in self.operations.iter().enumerate() {
            writeln!(f, "  {i}. {op}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AttrHasher, AttrValue, Manifest, ProjectConfig, ResourceDecl, ResourceModel, StateConfig,
    };
    use crate::plan::diff::DiffEngine;
    use crate::state::ResourceRecord;

    fn decl(id: &str, kind: &str, attrs: &[(&str, AttrValue)], deps: &[&str]) -> ResourceDecl {
        ResourceDecl {
            id: id.to_string(),
            kind: kind.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            depends_on: deps.iter().map(|s| (*s).to_string()).collect(),
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
        record.depends_on = decl.depends_on.iter().cloned().collect();
        record
    }

    fn plan_for(model: &ResourceModel, state: &StateSnapshot) -> Plan {
        let graph = DependencyGraph::build(model).unwrap();
        let diff = DiffEngine::new().compute_diff(model, state);
        Plan::from_diff(&diff, &graph, state).unwrap()
    }

    #[test]
    fn test_fresh_creates_in_dependency_order() {
        let instance = decl(
            "instance",
            "compute-instance",
            &[
                (
                    "security_group",
                    AttrValue::String(String::from("${net.id}")),
                ),
                ("role", AttrValue::String(String::from("${role.arn}"))),
            ],
            &[],
        );
        let model = model(vec![
            decl("net", "network-rule", &[], &[]),
            decl("role", "identity-role", &[], &[]),
            instance,
        ]);

        let plan = plan_for(&model, &StateSnapshot::new());
        let actions: Vec<(&str, OpAction)> = plan
            .operations
            .iter()
            .map(|op| (op.resource.as_str(), op.action))
            .collect();

        // Independent creates come first in identifier order.
        assert_eq!(
            actions,
            vec![
                ("net", OpAction::Create),
                ("role", OpAction::Create),
                ("instance", OpAction::Create),
            ]
        );

        // The instance waits for both of its dependencies.
        assert_eq!(plan.operations[2].depends_on, vec![0, 1]);
    }

    #[test]
    fn test_removing_leaf_yields_single_delete() {
        let net = decl("net", "network-rule", &[], &[]);
        let role = decl("role", "identity-role", &[], &[]);
        let instance = decl("instance", "compute-instance", &[], &["net", "role"]);

        let state = StateSnapshot::from_records(vec![
            applied_record(&net, "sg-1"),
            applied_record(&role, "role-1"),
            applied_record(&instance, "i-1"),
        ]);
        let model = model(vec![net, role]);

        let plan = plan_for(&model, &state);
        let changes: Vec<(&str, OpAction)> = plan
            .operations
            .iter()
            .filter(|op| op.action != OpAction::Noop)
            .map(|op| (op.resource.as_str(), op.action))
            .collect();

        assert_eq!(changes, vec![("instance", OpAction::Delete)]);
    }

    #[test]
    fn test_deletes_run_in_reverse_dependency_order() {
        let net = decl("net", "network-rule", &[], &[]);
        let instance = decl("instance", "compute-instance", &[], &["net"]);
        let state = StateSnapshot::from_records(vec![
            applied_record(&net, "sg-1"),
            applied_record(&instance, "i-1"),
        ]);
        let model = model(vec![]);

        let plan = plan_for(&model, &state);
        let instance_delete = plan.position_of("instance", OpAction::Delete).unwrap();
        let net_delete = plan.position_of("net", OpAction::Delete).unwrap();

        assert!(instance_delete < net_delete);
        assert!(plan.operations[net_delete]
            .depends_on
            .contains(&instance_delete));
    }

    #[test]
    fn test_replace_is_delete_then_create() {
        let old = decl(
            "server",
            "compute-instance",
            &[("image", AttrValue::String(String::from("ubuntu-22.04")))],
            &[],
        );
        let state = StateSnapshot::from_records(vec![applied_record(&old, "i-1")]);
        let model = model(vec![decl(
            "server",
            "compute-instance",
            &[("image", AttrValue::String(String::from("ubuntu-24.04")))],
            &[],
        )]);

        let plan = plan_for(&model, &state);
        let delete = plan.position_of("server", OpAction::Delete).unwrap();
        let create = plan.position_of("server", OpAction::Create).unwrap();

        assert!(delete < create);
        assert!(plan.operations[create].depends_on.contains(&delete));
        assert!(plan.operations[delete].part_of_replace);
        assert!(plan.operations[create].part_of_replace);
    }

    #[test]
    fn test_cascading_replace_sequencing() {
        // Both net and its dependent instance are replaced. The instance
        // is torn down first, then net, then net comes back, then the
        // instance.
        let old_net = decl(
            "net",
            "identity-role",
            &[("name", AttrValue::String(String::from("old")))],
            &[],
        );
        let old_instance = decl(
            "instance",
            "compute-instance",
            &[("image", AttrValue::String(String::from("v1")))],
            &["net"],
        );
        let state = StateSnapshot::from_records(vec![
            applied_record(&old_net, "role-1"),
            applied_record(&old_instance, "i-1"),
        ]);

        let model = model(vec![
            decl(
                "net",
                "identity-role",
                &[("name", AttrValue::String(String::from("new")))],
                &[],
            ),
            decl(
                "instance",
                "compute-instance",
                &[("image", AttrValue::String(String::from("v2")))],
                &["net"],
            ),
        ]);

        let plan = plan_for(&model, &state);
        let del_instance = plan.position_of("instance", OpAction::Delete).unwrap();
        let del_net = plan.position_of("net", OpAction::Delete).unwrap();
        let cr_net = plan.position_of("net", OpAction::Create).unwrap();
        let cr_instance = plan.position_of("instance", OpAction::Create).unwrap();

        assert!(del_instance < del_net);
        assert!(del_net < cr_net);
        assert!(cr_net < cr_instance);
    }

    #[test]
    fn test_idempotent_plan_is_all_noops() {
        let net = decl("net", "network-rule", &[], &[]);
        let state = StateSnapshot::from_records(vec![applied_record(&net, "sg-1")]);
        let model = model(vec![net]);

        let plan = plan_for(&model, &state);
        assert!(plan.is_changeless());
        assert_eq!(plan.count(OpAction::Noop), 1);
    }

    #[test]
    fn test_plans_are_deterministic() {
        let build = || {
            let model = model(vec![
                decl("zeta", "address", &[], &[]),
                decl("alpha", "address", &[], &[]),
                decl("mid", "address", &[], &["alpha"]),
            ]);
            plan_for(&model, &StateSnapshot::new())
        };

        let a = build();
        let b = build();
        let key = |p: &Plan| {
            p.operations
                .iter()
                .map(|op| (op.resource.clone(), op.action, op.depends_on.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(key(&a), key(&b));

        // Ready operations surface lexicographically.
        assert_eq!(a.operations[0].resource, "alpha");
    }

    #[test]
    fn test_missing_remote_id_is_rejected() {
        let net = decl("net", "network-rule", &[], &[]);
        let mut record = applied_record(&net, "");
        record.attr_hash = String::from("stale");
        let state = StateSnapshot::from_records(vec![record]);
        let model = model(vec![net]);

        let graph = DependencyGraph::build(&model).unwrap();
        let diff = DiffEngine::new().compute_diff(&model, &state);
        let err = Plan::from_diff(&diff, &graph, &state).unwrap_err();
        assert!(matches!(
            err,
            StratusError::Plan(PlanError::MissingRemoteId { .. })
        ));
    }

    #[test]
    fn test_destroy_orders_all_deletes() {
        let net = decl("net", "network-rule", &[], &[]);
        let instance = decl("instance", "compute-instance", &[], &["net"]);
        let ip = decl("ip", "address", &[], &["instance"]);
        let state = StateSnapshot::from_records(vec![
            applied_record(&net, "sg-1"),
            applied_record(&instance, "i-1"),
            applied_record(&ip, "eip-1"),
        ]);

        let plan = Plan::destroy(&state).unwrap();
        assert_eq!(plan.len(), 3);
        assert!(plan.operations.iter().all(|op| op.action == OpAction::Delete));

        let pos = |id: &str| plan.position_of(id, OpAction::Delete).unwrap();
        assert!(pos("ip") < pos("instance"));
        assert!(pos("instance") < pos("net"));
    }
}

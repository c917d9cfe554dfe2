//! Plan executor with a bounded worker pool.
//!
//! The dispatcher owns the in-memory snapshot and the outcome table;
//! worker tasks only talk to the provider. Operations are dispatched as
//! their dependencies complete, so independent branches run concurrently
//! while a chain stays strictly sequential. A failure marks its whole
//! dependency subtree blocked and leaves everything else running; state
//! is persisted after every individual success.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{PlanError, Result, StratusError};
use crate::model::{resolve_references, AttrValue, ResourceModel};
use crate::provider::{Provisioner, ResourceHandle};
use crate::state::{ResourceRecord, StateSnapshot, StateStore};

use super::plan::{OpAction, Operation, Plan};

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Executes a plan against the provisioning API.
pub struct ApplyExecutor {
    /// The provisioning API.
    provisioner: Arc<dyn Provisioner>,
    /// State persistence.
    store: Arc<dyn StateStore>,
    /// Worker pool size.
    workers: usize,
}

/// Outcome of a single operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The operation completed.
    Succeeded,
    /// The provider call failed.
    Failed {
        /// The error, rendered.
        error: String,
    },
    /// A dependency failed or was itself blocked.
    Blocked {
        /// The unsatisfied dependency.
        on: String,
    },
    /// Nothing to do (no-op).
    Skipped,
    /// Never dispatched because the run was cancelled.
    Cancelled,
}

/// Per-operation result, in plan order.
#[derive(Debug, Clone)]
pub struct OperationResult {
    /// Resource identifier.
    pub resource: String,
    /// Resource kind.
    pub kind: String,
    /// The planned action.
    pub action: OpAction,
    /// What happened.
    pub outcome: OperationOutcome,
}

/// Report of a full apply run.
#[derive(Debug)]
pub struct ApplyReport {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Per-operation results, in plan order.
    pub results: Vec<OperationResult>,
}

/// What a worker task produced.
enum TaskOutput {
    Created(ResourceHandle),
    Updated(ResourceHandle),
    Deleted,
}

impl ApplyExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(provisioner: Arc<dyn Provisioner>, store: Arc<dyn StateStore>) -> Self {
        Self {
            provisioner,
            store,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Sets the worker pool size (minimum 1).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Applies the plan.
    ///
    /// Returns a per-operation report; provider failures are recorded in
    /// it rather than returned. The error path is reserved for fatal
    /// conditions (state persistence failures, internal inconsistency).
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be persisted after a success or
    /// if a worker task panics.
    pub async fn execute(
        &self,
        plan: &Plan,
        model: &ResourceModel,
        snapshot: StateSnapshot,
        cancel: &AtomicBool,
    ) -> Result<ApplyReport> {
        let started_at = Utc::now();
        let ops = &plan.operations;
        let n = ops.len();

        info!(
            "Applying plan: {n} operations with {} worker(s)",
            self.workers
        );

        let mut snapshot = snapshot;
        let mut remaining: Vec<usize> = ops.iter().map(|op| op.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![vec![]; n];
        for (i, op) in ops.iter().enumerate() {
            for &dep in &op.depends_on {
                dependents[dep].push(i);
            }
        }

        let mut outcomes: Vec<Option<OperationOutcome>> = vec![None; n];
        let mut ready: VecDeque<usize> = remaining
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count == 0)
            .map(|(i, _)| i)
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set: JoinSet<(usize, Result<TaskOutput>)> = JoinSet::new();

        loop {
            if !cancel.load(Ordering::SeqCst) {
                while let Some(i) = ready.pop_front() {
                    if outcomes[i].is_some() {
                        continue;
                    }
                    let op = &ops[i];
                    match op.action {
                        OpAction::Noop => {
                            debug!("Skipping {}: up to date", op.resource);
                            outcomes[i] = Some(OperationOutcome::Skipped);
                            Self::satisfy(i, &dependents, &mut remaining, &outcomes, &mut ready);
                        }
                        OpAction::Create | OpAction::Update => {
                            match Self::resolve_attributes(op, model, &snapshot) {
                                Ok(attributes) => {
                                    self.spawn_task(&mut join_set, &semaphore, i, op, attributes);
                                }
                                Err(e) => {
                                    error!("Cannot dispatch {}: {e}", op.resource);
                                    outcomes[i] =
                                        Some(OperationOutcome::Failed { error: e.to_string() });
                                    Self::block_dependents(i, ops, &dependents, &mut outcomes);
                                }
                            }
                        }
                        OpAction::Delete => {
                            self.spawn_task(&mut join_set, &semaphore, i, op, BTreeMap::new());
                        }
                    }
                }
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (i, result) = joined
                .map_err(|e| StratusError::internal(format!("Worker task panicked: {e}")))?;

            match result {
                Ok(output) => {
                    self.persist_success(&ops[i], output, model, &mut snapshot)
                        .await?;
                    info!("{} succeeded", ops[i].description());
                    outcomes[i] = Some(OperationOutcome::Succeeded);
                    Self::satisfy(i, &dependents, &mut remaining, &outcomes, &mut ready);
                }
                Err(e) => {
                    error!("{} failed: {e}", ops[i].description());
                    outcomes[i] = Some(OperationOutcome::Failed { error: e.to_string() });
                    Self::block_dependents(i, ops, &dependents, &mut outcomes);
                }
            }
        }

        if cancel.load(Ordering::SeqCst) {
            warn!("Apply cancelled; remaining operations were not dispatched");
        }

        let results = ops
            .iter()
            .zip(outcomes)
            .map(|(op, outcome)| OperationResult {
                resource: op.resource.clone(),
                kind: op.kind.clone(),
                action: op.action,
                outcome: outcome.unwrap_or(OperationOutcome::Cancelled),
            })
            .collect();

        let report = ApplyReport {
            started_at,
            finished_at: Utc::now(),
            results,
        };
        info!("Apply finished: {report}");
        Ok(report)
    }

    /// Marks dependents of a completed operation ready once all of their
    /// dependencies are satisfied. Skipped counts as satisfied.
    fn satisfy(
        completed: usize,
        dependents: &[Vec<usize>],
        remaining: &mut [usize],
        outcomes: &[Option<OperationOutcome>],
        ready: &mut VecDeque<usize>,
    ) {
        for &j in &dependents[completed] {
            remaining[j] -= 1;
            if remaining[j] == 0 && outcomes[j].is_none() {
                ready.push_back(j);
            }
        }
    }

    /// Marks the whole dependency subtree of a failed operation blocked,
    /// each entry naming its own unsatisfied dependency.
    fn block_dependents(
        failed: usize,
        ops: &[Operation],
        dependents: &[Vec<usize>],
        outcomes: &mut [Option<OperationOutcome>],
    ) {
        let mut stack = vec![failed];
        while let Some(k) = stack.pop() {
            for &j in &dependents[k] {
                if outcomes[j].is_none() {
                    debug!("{} blocked on {}", ops[j].resource, ops[k].resource);
                    outcomes[j] = Some(OperationOutcome::Blocked {
                        on: ops[k].resource.clone(),
                    });
                    stack.push(j);
                }
            }
        }
    }

    /// Resolves the declared attributes of an operation against recorded
    /// outputs. Runs at dispatch time, after the dependencies converged.
    fn resolve_attributes(
        op: &Operation,
        model: &ResourceModel,
        snapshot: &StateSnapshot,
    ) -> Result<BTreeMap<String, AttrValue>> {
        let decl = model.get(&op.resource).ok_or_else(|| {
            StratusError::internal(format!("Resource '{}' missing from model", op.resource))
        })?;

        let mut resolved = BTreeMap::new();
        for (name, value) in &decl.attributes {
            let value = resolve_references(value, &|resource, output| {
                snapshot.lookup_output(resource, output)
            })
            .map_err(|reference| {
                StratusError::Plan(PlanError::UnresolvedReference {
                    resource: op.resource.clone(),
                    reference,
                    message: String::from("Referenced output is not recorded"),
                })
            })?;
            resolved.insert(name.clone(), value);
        }
        Ok(resolved)
    }

    /// Spawns a worker task for an operation. The semaphore bounds how
    /// many provider calls run at once.
    fn spawn_task(
        &self,
        join_set: &mut JoinSet<(usize, Result<TaskOutput>)>,
        semaphore: &Arc<Semaphore>,
        index: usize,
        op: &Operation,
        attributes: BTreeMap<String, AttrValue>,
    ) {
        let provisioner = Arc::clone(&self.provisioner);
        let semaphore = Arc::clone(semaphore);
        let action = op.action;
        let kind = op.kind.clone();
        let resource = op.resource.clone();
        let remote_id = op.remote_id.clone().unwrap_or_default();

        join_set.spawn(async move {
            let result = async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| StratusError::internal("Worker pool closed"))?;

                match action {
                    OpAction::Create => provisioner
                        .create(&kind, &resource, &attributes)
                        .await
                        .map(TaskOutput::Created),
                    OpAction::Update => provisioner
                        .update(&kind, &remote_id, &attributes)
                        .await
                        .map(TaskOutput::Updated),
                    OpAction::Delete => provisioner
                        .delete(&kind, &remote_id)
                        .await
                        .map(|()| TaskOutput::Deleted),
                    OpAction::Noop => {
                        Err(StratusError::internal("No-op dispatched to a worker"))
                    }
                }
            }
            .await;
            (index, result)
        });
    }

    /// Persists the result of a successful operation before anything
    /// depending on it is dispatched.
    async fn persist_success(
        &self,
        op: &Operation,
        output: TaskOutput,
        model: &ResourceModel,
        snapshot: &mut StateSnapshot,
    ) -> Result<()> {
        match output {
            TaskOutput::Created(handle) => {
                let decl = model.get(&op.resource).ok_or_else(|| {
                    StratusError::internal(format!(
                        "Resource '{}' missing from model",
                        op.resource
                    ))
                })?;

                let mut record = ResourceRecord::new(
                    &op.resource,
                    &op.kind,
                    &handle.remote_id,
                    op.new_hash.as_deref().unwrap_or_default(),
                );
                record.attributes = decl.attributes.clone();
                record.outputs = handle.outputs;
                record.depends_on = model
                    .dependencies_of(&op.resource)
                    .into_iter()
                    .map(str::to_string)
                    .collect();

                self.store.save_record(&record).await?;
                snapshot.set(record);
            }
            TaskOutput::Updated(handle) => {
                let decl = model.get(&op.resource).ok_or_else(|| {
                    StratusError::internal(format!(
                        "Resource '{}' missing from model",
                        op.resource
                    ))
                })?;

                let mut record = snapshot.get(&op.resource).map_or_else(
                    || {
                        ResourceRecord::new(&op.resource, &op.kind, &handle.remote_id, "")
                    },
                    Clone::clone,
                );
                record.remote_id = handle.remote_id;
                record.record_apply(
                    decl.attributes.clone(),
                    op.new_hash.as_deref().unwrap_or_default(),
                    handle.outputs,
                );
                record.depends_on = model
                    .dependencies_of(&op.resource)
                    .into_iter()
                    .map(str::to_string)
                    .collect();

                self.store.save_record(&record).await?;
                snapshot.set(record);
            }
            TaskOutput::Deleted => {
                self.store.remove_record(&op.resource).await?;
                snapshot.remove(&op.resource);
            }
        }
        Ok(())
    }
}

impl ApplyReport {
    /// Counts results with the given outcome family.
    fn count(&self, matcher: impl Fn(&OperationOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| matcher(&r.outcome)).count()
    }

    /// Number of succeeded operations.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Succeeded))
    }

    /// Number of failed operations.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Failed { .. }))
    }

    /// Number of blocked operations.
    #[must_use]
    pub fn blocked(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Blocked { .. }))
    }

    /// Number of skipped (no-op) operations.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Skipped))
    }

    /// Number of cancelled operations.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Cancelled))
    }

    /// True if every operation either succeeded or was a no-op.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.results.iter().all(|r| {
            matches!(
                r.outcome,
                OperationOutcome::Succeeded | OperationOutcome::Skipped
            )
        })
    }

    /// Result for a resource, if it appears in the plan.
    #[must_use]
    pub fn result_for(&self, resource: &str) -> Option<&OperationResult> {
        self.results.iter().find(|r| r.resource == resource)
    }
}

impl std::fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::Blocked { on } => write!(f, "blocked on {on}"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} blocked, {} skipped, {} cancelled",
            self.succeeded(),
            self.failed(),
            self.blocked(),
            self.skipped(),
            self.cancelled()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::graph::DependencyGraph;
    use crate::model::{Manifest, ProjectConfig, ResourceDecl, StateConfig};
    use crate::plan::diff::DiffEngine;
    use crate::provider::MockProvisioner;
    use crate::state::LocalStateStore;
    use mockall::Sequence;
    use tempfile::TempDir;

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

    fn plan_for(model: &ResourceModel, state: &StateSnapshot) -> Plan {
        let graph = DependencyGraph::build(model).unwrap();
        let diff = DiffEngine::new().compute_diff(model, state);
        Plan::from_diff(&diff, &graph, state).unwrap()
    }

    fn store() -> (Arc<LocalStateStore>, TempDir) {
        let temp = TempDir::new().expect("Failed to create temp dir");
        (Arc::new(LocalStateStore::with_base_dir(temp.path())), temp)
    }

    fn created(name: &str) -> ResourceHandle {
        ResourceHandle::new(format!("r-{name}")).with_output("id", format!("r-{name}"))
    }

    async fn run(
        mock: MockProvisioner,
        store: Arc<LocalStateStore>,
        model: &ResourceModel,
        plan: &Plan,
        snapshot: StateSnapshot,
        cancel: bool,
    ) -> ApplyReport {
        let executor = ApplyExecutor::new(Arc::new(mock), store).with_workers(2);
        executor
            .execute(plan, model, snapshot, &AtomicBool::new(cancel))
            .await
            .expect("execute failed")
    }

    #[tokio::test]
    async fn test_diamond_partial_failure() {
        // top depends on left and right, which both depend on base.
        // left fails: top is blocked, right and base are unaffected.
        let model = model(vec![
            decl("base", "network-rule", &[], &[]),
            decl("left", "identity-role", &[], &["base"]),
            decl("right", "identity-role", &[], &["base"]),
            decl("top", "compute-instance", &[], &["left", "right"]),
        ]);
        let plan = plan_for(&model, &StateSnapshot::new());

        let mut mock = MockProvisioner::new();
        mock.expect_create().returning(|_, name, _| {
            if name == "left" {
                Err(StratusError::Provider(ProviderError::api_error(
                    500,
                    "capacity exceeded",
                )))
            } else {
                Ok(created(name))
            }
        });

        let (store, _temp) = store();
        let report = run(mock, Arc::clone(&store), &model, &plan, StateSnapshot::new(), false).await;

        assert_eq!(
            report.result_for("base").unwrap().outcome,
            OperationOutcome::Succeeded
        );
        assert_eq!(
            report.result_for("right").unwrap().outcome,
            OperationOutcome::Succeeded
        );
        assert!(matches!(
            report.result_for("left").unwrap().outcome,
            OperationOutcome::Failed { .. }
        ));
        assert_eq!(
            report.result_for("top").unwrap().outcome,
            OperationOutcome::Blocked {
                on: String::from("left")
            }
        );
        assert!(!report.is_clean());

        // Only the completed operations were persisted.
        let persisted = store.load().await.unwrap();
        assert_eq!(persisted.ids(), vec!["base", "right"]);
    }

    #[tokio::test]
    async fn test_replace_deletes_before_creating() {
        let old = decl(
            "server",
            "compute-instance",
            &[("image", AttrValue::String(String::from("v1")))],
            &[],
        );
        let hasher = crate::model::AttrHasher::new();
        let mut record =
            ResourceRecord::new("server", "compute-instance", "i-1", &hasher.hash_resource(&old));
        record.attributes = old.attributes.clone();
        let snapshot = StateSnapshot::from_records(vec![record]);

        let model = model(vec![decl(
            "server",
            "compute-instance",
            &[("image", AttrValue::String(String::from("v2")))],
            &[],
        )]);
        let plan = plan_for(&model, &snapshot);

        let mut mock = MockProvisioner::new();
        let mut seq = Sequence::new();
        mock.expect_delete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(ResourceHandle::new("i-2").with_output("id", "i-2")));

        let (store, _temp) = store();
        let report = run(mock, Arc::clone(&store), &model, &plan, snapshot, false).await;

        assert!(report.is_clean());
        let persisted = store.load().await.unwrap();
        assert_eq!(persisted.get("server").unwrap().remote_id, "i-2");
    }

    #[tokio::test]
    async fn test_outputs_flow_into_dependent_attributes() {
        let instance = decl(
            "instance",
            "compute-instance",
            &[(
                "security_group",
                AttrValue::String(String::from("${net.id}")),
            )],
            &[],
        );
        let model = model(vec![decl("net", "network-rule", &[], &[]), instance]);
        let plan = plan_for(&model, &StateSnapshot::new());

        let mut mock = MockProvisioner::new();
        mock.expect_create()
            .withf(|_, name, _| name == "net")
            .returning(|_, _, _| Ok(ResourceHandle::new("sg-9").with_output("id", "sg-9")));
        mock.expect_create()
            .withf(|_, name, attrs| {
                name == "instance"
                    && attrs.get("security_group")
                        == Some(&AttrValue::String(String::from("sg-9")))
            })
            .returning(|_, _, _| Ok(ResourceHandle::new("i-9")));

        let (store, _temp) = store();
        let report = run(mock, store, &model, &plan, StateSnapshot::new(), false).await;
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_up_to_date_plan_is_all_skipped() {
        let net = decl("net", "network-rule", &[], &[]);
        let hasher = crate::model::AttrHasher::new();
        let record =
            ResourceRecord::new("net", "network-rule", "sg-1", &hasher.hash_resource(&net));
        let snapshot = StateSnapshot::from_records(vec![record]);
        let model = model(vec![net]);
        let plan = plan_for(&model, &snapshot);

        // No provisioner expectations: any call would fail the test.
        let mock = MockProvisioner::new();
        let (store, _temp) = store();
        let report = run(mock, store, &model, &plan, snapshot, false).await;

        assert_eq!(report.skipped(), 1);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let model = model(vec![
            decl("net", "network-rule", &[], &[]),
            decl("role", "identity-role", &[], &[]),
        ]);
        let plan = plan_for(&model, &StateSnapshot::new());

        let mock = MockProvisioner::new();
        let (store, _temp) = store();
        let report = run(mock, store, &model, &plan, StateSnapshot::new(), true).await;

        assert_eq!(report.cancelled(), 2);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_chain_stays_sequential_on_failure() {
        // a -> b -> c: b fails, c was dispatched first and succeeds,
        // a is blocked on b.
        let model = model(vec![
            decl("a", "address", &[], &["b"]),
            decl("b", "identity-role", &[], &["c"]),
            decl("c", "network-rule", &[], &[]),
        ]);
        let plan = plan_for(&model, &StateSnapshot::new());

        let mut mock = MockProvisioner::new();
        mock.expect_create().returning(|_, name, _| {
            if name == "b" {
                Err(StratusError::Provider(ProviderError::api_error(403, "denied")))
            } else {
                Ok(created(name))
            }
        });

        let (store, _temp) = store();
        let report = run(mock, Arc::clone(&store), &model, &plan, StateSnapshot::new(), false).await;

        assert_eq!(
            report.result_for("c").unwrap().outcome,
            OperationOutcome::Succeeded
        );
        assert!(matches!(
            report.result_for("b").unwrap().outcome,
            OperationOutcome::Failed { .. }
        ));
        assert_eq!(
            report.result_for("a").unwrap().outcome,
            OperationOutcome::Blocked {
                on: String::from("b")
            }
        );

        let persisted = store.load().await.unwrap();
        assert_eq!(persisted.ids(), vec!["c"]);
    }
}

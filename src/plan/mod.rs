//! Planning and execution.
//!
//! The plan pipeline runs in three steps: the diff engine compares the
//! declared model against recorded state, plan construction lowers the
//! diff onto the dependency graph as an ordered operation sequence, and
//! the executor applies it with bounded parallelism.

pub mod diff;
pub mod executor;
#[allow(clippy::module_inception)]
pub mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use executor::{ApplyExecutor, ApplyReport, OperationOutcome, OperationResult, DEFAULT_WORKERS};
pub use plan::{OpAction, Operation, Plan};

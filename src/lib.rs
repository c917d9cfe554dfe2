// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stratus Deploy
//!
//! A declarative, idempotent resource-provisioning engine.
//!
//! ## Overview
//!
//! Stratus turns a YAML manifest of typed resources into API calls against a
//! provisioning service, allowing you to:
//!
//! - Define your infrastructure as code in a YAML manifest
//! - Wire resources together with `${resource.output}` references
//! - Preview every change as an ordered plan before applying it
//! - Apply plans with bounded parallelism and per-resource state tracking
//!
//! ## Architecture
//!
//! The system is built around **plan-then-apply**:
//!
//! 1. **Desired state**: Declared in `stratus.deploy.yaml`
//! 2. **Recorded state**: Per-resource records from previous applies
//! 3. **Plan engine**: Diffs the two and emits a dependency-ordered plan
//! 4. **Executor**: Runs the plan with a worker pool, persisting after
//!    each success so a partial failure never loses completed work
//!
//! ## Modules
//!
//! - [`model`]: Manifest parsing, validation, references, and hashing
//! - [`graph`]: Dependency graph, cycle detection, topological ordering
//! - [`plan`]: Diff computation, plan construction, and execution
//! - [`state`]: State record storage and locking
//! - [`provider`]: Provisioning API client
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: my-app
//!   environment: prod
//!
//! resources:
//!   - id: web-sg
//!     kind: network-rule
//!     attributes:
//!       port: 7860
//!       cidr: "0.0.0.0/0"
//!
//!   - id: app-server
//!     kind: compute-instance
//!     attributes:
//!       instance_type: t3.large
//!       image: amazon-linux-2023
//!       security_group: "${web-sg.id}"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod error;
pub mod graph;
pub mod model;
pub mod plan;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use error::{Result, StratusError};
pub use graph::DependencyGraph;
pub use model::{AttrHasher, Manifest, ManifestParser, ModelValidator, ResourceModel};
pub use plan::{ApplyExecutor, ApplyReport, DiffEngine, Plan};
pub use provider::{HttpProvisioner, Provisioner, ResourceHandle};
pub use state::{LocalStateStore, ResourceRecord, StateSnapshot, StateStore};

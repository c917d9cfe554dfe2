//! Resource model: manifest types, parsing, validation, and hashing.
//!
//! The model is the declarative side of the engine: a set of typed
//! resource declarations with attribute values and cross-resource
//! references, validated before any planning happens.

mod hash;
mod kind;
mod parser;
mod resource;
mod validator;

pub use hash::AttrHasher;
pub use kind::{kind_allows_any_output, kind_output_known, kind_replace_triggers, KindSchema, KNOWN_KINDS};
pub use parser::{find_manifest_file, ManifestParser, DEFAULT_MANIFEST_FILES};
pub use resource::{
    resolve_references, AttrValue, Manifest, ProjectConfig, Reference, ResourceDecl,
    ResourceModel, StateConfig,
};
pub use validator::{ModelValidator, ValidationIssue, ValidationResult};

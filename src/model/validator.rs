//! Manifest validation.
//!
//! Shape and naming checks that run before a model is built, collecting
//! every problem rather than stopping at the first. Structural errors
//! that have typed variants (duplicate identifiers, unknown references)
//! are detected when the [`super::ResourceModel`] is built.

use crate::error::{ModelError, Result, StratusError};
use std::collections::HashSet;
use tracing::debug;

use super::kind::schema_for;
use super::resource::Manifest;

/// Validator for deployment manifests.
#[derive(Debug, Default)]
pub struct ModelValidator;

/// Validation result containing all issues found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationIssue>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationIssue {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ModelValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation error is found.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(manifest, &mut result);
        Self::validate_resources(manifest, &mut result);

        if result.errors.is_empty() {
            debug!("Manifest validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(StratusError::Model(ModelError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates project configuration.
    fn validate_project(manifest: &Manifest, result: &mut ValidationResult) {
        if manifest.project.name.is_empty() {
            result.errors.push(ValidationIssue {
                field: String::from("project.name"),
                message: String::from("Project name cannot be empty"),
            });
        } else if !is_valid_name(&manifest.project.name) {
            result.errors.push(ValidationIssue {
                field: String::from("project.name"),
                message: format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    manifest.project.name
                ),
            });
        }

        if manifest.project.environment.is_empty() {
            result.errors.push(ValidationIssue {
                field: String::from("project.environment"),
                message: String::from("Environment cannot be empty"),
            });
        }
    }

    /// Validates resource declarations.
    fn validate_resources(manifest: &Manifest, result: &mut ValidationResult) {
        if manifest.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources declared in manifest"));
            return;
        }

        let mut seen_ids = HashSet::new();

        for (i, decl) in manifest.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !is_valid_name(&decl.id) {
                result.errors.push(ValidationIssue {
                    field: format!("{prefix}.id"),
                    message: format!(
                        "Resource identifier '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        decl.id
                    ),
                });
            }

            // Duplicates also fail model construction; reported here so the
            // user sees every problem in one pass.
            if !seen_ids.insert(&decl.id) {
                result.errors.push(ValidationIssue {
                    field: format!("{prefix}.id"),
                    message: format!("Duplicate resource identifier: {}", decl.id),
                });
            }

            if decl.kind.is_empty() {
                result.errors.push(ValidationIssue {
                    field: format!("{prefix}.kind"),
                    message: String::from("Resource kind cannot be empty"),
                });
            } else if schema_for(&decl.kind).is_none() {
                result.warnings.push(format!(
                    "{prefix}.kind: Unknown kind '{}'. Attribute changes will update in place unless listed in replace_on.",
                    decl.kind
                ));
            }

            for trigger in &decl.replace_on {
                if !decl.attributes.contains_key(trigger) {
                    result.warnings.push(format!(
                        "{prefix}.replace_on: '{trigger}' does not name a declared attribute"
                    ));
                }
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase()
    {
        return false;
    }

    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return false;
        }
    }

    if name.ends_with('-') {
        return false;
    }

    if name.contains("--") {
        return false;
    }

    true
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::resource::{ProjectConfig, ResourceDecl, StateConfig};
    use std::collections::BTreeMap;

    fn manifest(resources: Vec<ResourceDecl>) -> Manifest {
        Manifest {
            project: ProjectConfig {
                name: String::from("demo"),
                environment: String::from("dev"),
            },
            state: StateConfig::default(),
            resources,
        }
    }

    fn decl(id: &str, kind: &str) -> ResourceDecl {
        ResourceDecl {
            id: id.to_string(),
            kind: kind.to_string(),
            attributes: BTreeMap::new(),
            depends_on: vec![],
            replace_on: vec![],
        }
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web-sg"));
        assert!(is_valid_name("app-server-2"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web-Sg")); // uppercase
        assert!(!is_valid_name("2-sg")); // starts with number
        assert!(!is_valid_name("web_sg")); // underscore
        assert!(!is_valid_name("web-")); // ends with hyphen
        assert!(!is_valid_name("web--sg")); // consecutive hyphens
    }

    #[test]
    fn test_empty_manifest_warns() {
        let validator = ModelValidator::new();
        let result = validator.validate(&manifest(vec![])).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_unknown_kind_warns() {
        let validator = ModelValidator::new();
        let result = validator
            .validate(&manifest(vec![decl("thing", "custom-kind")]))
            .unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("custom-kind")));
    }

    #[test]
    fn test_bad_identifier_errors() {
        let validator = ModelValidator::new();
        let err = validator.validate(&manifest(vec![decl("Bad_Id", "network-rule")]));
        assert!(err.is_err());
    }

    #[test]
    fn test_duplicate_identifier_errors() {
        let validator = ModelValidator::new();
        let err = validator.validate(&manifest(vec![
            decl("net", "network-rule"),
            decl("net", "network-rule"),
        ]));
        assert!(err.is_err());
    }
}

//! Manifest parsing and environment handling.
//!
//! Loads the deployment manifest from YAML, applies environment variable
//! overrides, and resolves provider credentials from the environment.

use crate::error::{ModelError, Result, StratusError};
use std::path::Path;
use tracing::{debug, info};

use super::resource::Manifest;

/// Parser for loading deployment manifests.
#[derive(Debug, Default)]
pub struct ManifestParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ManifestParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(StratusError::Model(ModelError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StratusError::Model(ModelError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        debug!("Parsing YAML manifest");

        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            StratusError::Model(ModelError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed manifest for project '{}' with {} resources",
            manifest.project.name,
            manifest.resources.len()
        );
        Ok(manifest)
    }

    /// Loads a manifest with environment variable overrides applied.
    ///
    /// Overrides use the `STRATUS_<SECTION>_<KEY>` format
    /// (e.g. `STRATUS_PROJECT_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let mut manifest = self.load_file(path)?;
        Self::apply_env_overrides(&mut manifest);
        Ok(manifest)
    }

    /// Applies environment variable overrides to the manifest.
    fn apply_env_overrides(manifest: &mut Manifest) {
        if let Ok(name) = std::env::var("STRATUS_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            manifest.project.name = name;
        }

        if let Ok(env) = std::env::var("STRATUS_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            manifest.project.environment = env;
        }

        if let Ok(path) = std::env::var("STRATUS_STATE_PATH") {
            debug!("Overriding state.path from environment");
            manifest.state.path = Some(path);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                StratusError::Model(ModelError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the provisioning API endpoint from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `STRATUS_API_URL` is not set.
    pub fn get_api_url() -> Result<String> {
        std::env::var("STRATUS_API_URL").map_err(|_| {
            StratusError::Model(ModelError::MissingEnvVar {
                name: String::from("STRATUS_API_URL"),
            })
        })
    }

    /// Gets the provisioning API token from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `STRATUS_API_TOKEN` is not set.
    pub fn get_api_token() -> Result<String> {
        std::env::var("STRATUS_API_TOKEN").map_err(|_| {
            StratusError::Model(ModelError::MissingEnvVar {
                name: String::from("STRATUS_API_TOKEN"),
            })
        })
    }
}

/// Default manifest file names to search for.
pub const DEFAULT_MANIFEST_FILES: &[&str] = &[
    "stratus.deploy.yaml",
    "stratus.deploy.yml",
    "deploy.yaml",
    "deploy.yml",
];

/// Finds the manifest file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no manifest file is found.
pub fn find_manifest_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_MANIFEST_FILES {
            let manifest_path = current.join(filename);
            if manifest_path.exists() {
                info!("Found manifest file: {}", manifest_path.display());
                return Ok(manifest_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(StratusError::Model(ModelError::FileNotFound {
        path: start.join(DEFAULT_MANIFEST_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_manifest() {
        let yaml = r"
project:
  name: test-project
resources: []
";
        let parser = ManifestParser::new();
        let manifest = parser.parse_yaml(yaml, None).unwrap();
        assert_eq!(manifest.project.name, "test-project");
        assert_eq!(manifest.project.environment, "dev");
        assert!(manifest.resources.is_empty());
    }

    #[test]
    fn test_parse_full_manifest() {
        let yaml = r#"
project:
  name: gradio-demo
  environment: prod

state:
  path: .stratus

resources:
  - id: web-sg
    kind: network-rule
    attributes:
      port: 7860
      protocol: tcp
      cidr: "0.0.0.0/0"

  - id: app-role
    kind: identity-role
    attributes:
      name: gradio_demo
      policies:
        - AmazonBedrockFullAccess
        - AmazonRekognitionFullAccess

  - id: app-server
    kind: compute-instance
    attributes:
      instance_type: t3.large
      image: amazon-linux-2023
      security_group: "${web-sg.id}"
      role: "${app-role.arn}"
      user_data: |
        yum update -y
        yum install -y git
    depends_on:
      - app-role

  - id: app-ip
    kind: address
    attributes:
      instance: "${app-server.id}"
"#;
        let parser = ManifestParser::new();
        let manifest = parser.parse_yaml(yaml, None).unwrap();
        assert_eq!(manifest.project.name, "gradio-demo");
        assert_eq!(manifest.resources.len(), 4);
        assert_eq!(manifest.resources[2].id, "app-server");
        assert_eq!(manifest.resources[2].depends_on, vec!["app-role"]);
        assert_eq!(manifest.state.path.as_deref(), Some(".stratus"));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let parser = ManifestParser::new();
        assert!(parser.parse_yaml("not: [valid", None).is_err());
    }
}

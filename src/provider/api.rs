//! The provisioning trait the executor is written against.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::AttrValue;

/// A remote resource as reported by the provider after a successful
/// create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    /// Provider-assigned identifier.
    pub remote_id: String,
    /// Named outputs (e.g. `id`, `public_ip`) that later references
    /// resolve against.
    pub outputs: BTreeMap<String, String>,
}

impl ResourceHandle {
    /// Creates a handle with the given remote identifier and no outputs.
    #[must_use]
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            outputs: BTreeMap::new(),
        }
    }

    /// Adds an output to the handle.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }
}

/// The idempotent provisioning API.
///
/// Implementations must be safe to retry: creating an already-created
/// resource or deleting an already-deleted one is not an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Creates a resource of the given kind with resolved attributes.
    ///
    /// # Errors
    ///
    /// Returns a provider error on API failure. The error is recorded
    /// against the operation; it never aborts independent branches.
    async fn create(
        &self,
        kind: &str,
        name: &str,
        attributes: &BTreeMap<String, AttrValue>,
    ) -> Result<ResourceHandle>;

    /// Updates an existing resource in place.
    ///
    /// # Errors
    ///
    /// Returns a provider error on API failure.
    async fn update(
        &self,
        kind: &str,
        remote_id: &str,
        attributes: &BTreeMap<String, AttrValue>,
    ) -> Result<ResourceHandle>;

    /// Deletes an existing resource. Deleting a resource the provider no
    /// longer knows about succeeds.
    ///
    /// # Errors
    ///
    /// Returns a provider error on API failure.
    async fn delete(&self, kind: &str, remote_id: &str) -> Result<()>;
}

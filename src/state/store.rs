//! State store trait definition.
//!
//! The store is the sole writer of state records; executor workers go
//! through it one write at a time.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::{ResourceRecord, StateSnapshot};
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the full snapshot: the union of all persisted records.
    ///
    /// Returns an empty snapshot if no state exists yet. Fails with a
    /// corruption error if any persisted record cannot be parsed; this
    /// is fatal and never silently discarded.
    async fn load(&self) -> Result<StateSnapshot>;

    /// Persists a single record atomically.
    async fn save_record(&self, record: &ResourceRecord) -> Result<()>;

    /// Removes the record for a resource identifier.
    async fn remove_record(&self, id: &str) -> Result<()>;

    /// Removes all records and the lock.
    async fn clear(&self) -> Result<()>;

    /// Acquires an advisory lock on the state.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases a lock on the state.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<StateSnapshot> {
        (**self).load().await
    }

    async fn save_record(&self, record: &ResourceRecord) -> Result<()> {
        (**self).save_record(record).await
    }

    async fn remove_record(&self, id: &str) -> Result<()> {
        (**self).remove_record(id).await
    }

    async fn clear(&self) -> Result<()> {
        (**self).clear().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

//! Local file-based state storage backend.
//!
//! Each resource gets its own record file under `records/`, written via
//! a temp file and an atomic rename. A partial apply that dies mid-run
//! therefore leaves exactly the records of the operations that finished.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Result, StateError, StratusError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{ResourceRecord, StateSnapshot};

/// Default state directory name.
const STATE_DIR: &str = ".stratus";

/// Subdirectory holding one JSON file per resource record.
const RECORDS_DIR: &str = "records";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Directory holding record files.
    records_dir: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a new local state store rooted in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the base directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| StratusError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();

        Self {
            records_dir: base_dir.join(RECORDS_DIR),
            lock_path: base_dir.join(LOCK_FILE),
        }
    }

    /// Path of the record file for a resource identifier.
    ///
    /// Identifiers are validated to lowercase alphanumerics and hyphens
    /// before any store call, so they are safe as file names.
    fn record_path(&self, id: &str) -> PathBuf {
        self.records_dir.join(format!("{id}.json"))
    }

    /// Ensures the state directories exist.
    async fn ensure_dirs(&self) -> Result<()> {
        if !self.records_dir.exists() {
            debug!("Creating state directory: {}", self.records_dir.display());
            fs::create_dir_all(&self.records_dir).await.map_err(|e| {
                StratusError::State(StateError::WriteFailed {
                    id: String::new(),
                    message: format!("Failed to create state directory: {e}"),
                })
            })?;
        }
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            StratusError::State(StateError::corrupt(format!("Failed to read lock file: {e}")))
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            StratusError::State(StateError::corrupt(format!("Failed to parse lock file: {e}")))
        })?;

        Ok(Some(lock_info))
    }

    /// Writes the lock file.
    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dirs().await?;

        let content = serde_json::to_string_pretty(lock_info).map_err(|e| {
            StratusError::State(StateError::serialization(format!(
                "Failed to serialize lock: {e}"
            )))
        })?;

        let mut file = fs::File::create(&self.lock_path).await.map_err(|e| {
            StratusError::State(StateError::LockFailed {
                message: format!("Failed to create lock file: {e}"),
            })
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            StratusError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            StratusError::State(StateError::LockFailed {
                message: format!("Failed to sync lock file: {e}"),
            })
        })?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                StratusError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        if !self.records_dir.exists() {
            debug!("State directory does not exist: {}", self.records_dir.display());
            return Ok(StateSnapshot::new());
        }

        info!("Loading state from: {}", self.records_dir.display());

        let mut entries = fs::read_dir(&self.records_dir).await.map_err(|e| {
            StratusError::State(StateError::corrupt(format!(
                "Failed to read state directory: {e}"
            )))
        })?;

        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            StratusError::State(StateError::corrupt(format!(
                "Failed to read state directory: {e}"
            )))
        })? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let content = fs::read_to_string(&path).await.map_err(|e| {
                StratusError::State(StateError::corrupt(format!(
                    "Failed to read record {}: {e}",
                    path.display()
                )))
            })?;

            let record: ResourceRecord = serde_json::from_str(&content).map_err(|e| {
                StratusError::State(StateError::corrupt(format!(
                    "Failed to parse record {}: {e}",
                    path.display()
                )))
            })?;

            records.push(record);
        }

        debug!("Loaded {} state records", records.len());
        Ok(StateSnapshot::from_records(records))
    }

    async fn save_record(&self, record: &ResourceRecord) -> Result<()> {
        self.ensure_dirs().await?;

        let path = self.record_path(&record.id);
        debug!("Saving state record: {}", path.display());

        let content = serde_json::to_string_pretty(record).map_err(|e| {
            StratusError::State(StateError::serialization(format!(
                "Failed to serialize record '{}': {e}",
                record.id
            )))
        })?;

        // Write to a temporary file first, then rename for atomicity.
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StratusError::State(StateError::WriteFailed {
                id: record.id.clone(),
                message: format!("Failed to create temp record file: {e}"),
            })
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            StratusError::State(StateError::WriteFailed {
                id: record.id.clone(),
                message: format!("Failed to write record file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            StratusError::State(StateError::WriteFailed {
                id: record.id.clone(),
                message: format!("Failed to sync record file: {e}"),
            })
        })?;

        fs::rename(&temp_path, &path).await.map_err(|e| {
            StratusError::State(StateError::WriteFailed {
                id: record.id.clone(),
                message: format!("Failed to rename record file: {e}"),
            })
        })?;

        Ok(())
    }

    async fn remove_record(&self, id: &str) -> Result<()> {
        let path = self.record_path(id);
        if path.exists() {
            debug!("Removing state record: {}", path.display());
            fs::remove_file(&path).await.map_err(|e| {
                StratusError::State(StateError::WriteFailed {
                    id: id.to_string(),
                    message: format!("Failed to remove record file: {e}"),
                })
            })?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        if self.records_dir.exists() {
            info!("Clearing state directory: {}", self.records_dir.display());
            fs::remove_dir_all(&self.records_dir).await.map_err(|e| {
                StratusError::State(StateError::WriteFailed {
                    id: String::new(),
                    message: format!("Failed to clear state directory: {e}"),
                })
            })?;
        }

        self.delete_lock_file().await?;
        Ok(())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(StratusError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);
        self.write_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

//! Advisory state locking.
//!
//! A lock file under the state directory keeps two processes from
//! applying against the same records at once. Locks expire after
//! [`LOCK_EXPIRY_SECS`] so a crashed process never wedges the state;
//! the next acquirer takes over an expired lock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long a lock is honored before it may be taken over, in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Contents of the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier; releasing requires presenting it.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock stops being honored.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a fresh lock for the given holder.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Whether the lock has passed its expiry and may be taken over.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Extends the expiry from now, for long-running applies.
    pub fn refresh(&mut self) {
        self.expires_at = Utc::now() + Duration::seconds(LOCK_EXPIRY_SECS);
    }

    /// Seconds until the lock expires, clamped at zero.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Builds a holder identifier for the current process, unique enough to
/// point a stuck-lock report at the right machine and process.
#[must_use]
pub fn generate_holder_id() -> String {
    let host = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let nonce = &Uuid::new_v4().to_string()[..8];

    format!("{host}-{pid}-{nonce}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lock_is_live() {
        let lock = LockInfo::new("apply-runner");
        assert_eq!(lock.holder, "apply-runner");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
        assert!(lock.remaining_secs() <= LOCK_EXPIRY_SECS);
    }

    #[test]
    fn test_expired_lock_detected() {
        let mut lock = LockInfo::new("stale");
        lock.expires_at = Utc::now() - Duration::seconds(1);
        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);

        lock.refresh();
        assert!(!lock.is_expired());
    }

    #[test]
    fn test_holder_ids_are_unique() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();
        assert_ne!(id1, id2);
        assert!(id1.contains(&std::process::id().to_string()));
    }
}

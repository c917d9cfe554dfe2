//! State persistence for applied resources.
//!
//! One record per resource identifier, persisted independently and
//! atomically so that state always reflects exactly the set of
//! operations that completed, even across a crash mid-apply.

mod local;
mod lock;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use store::StateStore;
pub use types::{ResourceRecord, StateSnapshot, STATE_VERSION};

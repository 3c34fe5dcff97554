//! State management module.
//!
//! Records which remote resource each declared resource maps to, the
//! configuration last applied to it, and a short operation history.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{HistoryEntry, ManagedResource, ManagedState, Operation, STATE_VERSION};

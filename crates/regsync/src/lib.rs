pub mod lock;
pub mod reconcile;

pub use lock::{read_marker, LockError, LockMarker, SyncLock};
pub use reconcile::{
    apply_snapshots, sync_state_entry, sync_user_entry, Reconciler, SyncError, SyncOutcome,
    SyncReport,
};

//! Client-side state: the shared value, its reducer and its cache.

pub mod reducer;
pub mod snapshot_cache;
pub mod state;

pub use reducer::{apply_local, metrics_update, reduce, LocalEdit};
pub use snapshot_cache::{SnapshotCache, SNAPSHOT_CACHE_KEY};
pub use state::{SharedState, SyncState};

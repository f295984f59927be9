//! Bookline Client - realtime data synchronization
//!
//! Keeps a local, always-consistent view of reservations, customer
//! conversations and vacation periods in sync with the booking backend over a
//! single shared WebSocket.

pub mod logging;

pub mod config;
pub mod error;
pub mod platform;
pub mod storage;
pub mod stores;
pub mod ws;

pub use config::SyncConfig;
pub use error::SyncError;
pub use stores::{SharedState, SnapshotCache, SyncState};
pub use ws::{ConnectionCoordinator, ConnectionStatus, RealtimeEvent, RealtimeSubscription};

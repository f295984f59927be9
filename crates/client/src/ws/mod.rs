//! Realtime connection to the booking backend.
//!
//! This module provides:
//! - One shared WebSocket per process, however many consumers mount
//! - Auto-reconnect with linear backoff and jitter, keepalive pings
//! - Reduction of server events into an immutable [`SyncState`](crate::stores::SyncState)
//! - A process-wide event channel for listeners outside the render path
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//! │ Subscription │ │ Subscription │ │ Subscription │   mount / drop
//! └──────────────┘ └──────────────┘ └──────────────┘
//!          │              │              │
//!          └──────────────┼──────────────┘
//!                         ▼
//!              ┌─────────────────────┐      ┌───────────┐
//!              │ConnectionCoordinator│─────▶│ Heartbeat │
//!              │ Idle/Locked/        │      └───────────┘
//!              │ Connecting/Open     │
//!              └─────────────────────┘
//!                ▲                 │ parse_frame + reduce
//!   TransportLink│                 ▼
//!       ┌────────────────┐  ┌──────────────┐   ┌──────────────┐
//!       │   Transport    │  │ watch<State> │──▶│SnapshotCache │
//!       └────────────────┘  └──────────────┘   └──────────────┘
//!                                  │
//!                                  ▼
//!                          ┌──────────────┐
//!                          │ FanoutBridge │ broadcast<RealtimeEvent>
//!                          └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let coordinator = ConnectionCoordinator::builder(SyncConfig::from_env()?)
//!     .snapshot_cache(cache)
//!     .build();
//!
//! let subscription = coordinator.mount();
//! let mut changes = subscription.changed();
//! while changes.changed().await.is_ok() {
//!     let state = changes.borrow_and_update().clone();
//!     println!("{} customers", state.reservations.len());
//! }
//! ```

mod connection;
mod fanout;
mod heartbeat;
#[cfg(feature = "ui")]
mod hooks;
mod manager;
mod reconnect;
mod subscription;

pub use connection::{
    ConnectionStatus, Outbound, ScriptedConnector, ScriptedLink, TransportConnector,
    TransportEvent, TransportLink, TungsteniteConnector,
};
pub use fanout::{FanoutBridge, Notification, RealtimeEvent, NOTIFICATION_HISTORY_CAP};
pub use heartbeat::Heartbeat;
#[cfg(feature = "ui")]
pub use hooks::{provide_realtime, use_realtime, UseRealtime};
pub use manager::{ConnectionCoordinator, CoordinatorBuilder};
pub use reconnect::{is_unexpected_close, ReconnectConfig};
pub use subscription::RealtimeSubscription;

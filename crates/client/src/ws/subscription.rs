//! Per-consumer handle on the shared connection.

use bookline_shared::{ClientCommand, ConversationMessage, CustomerId, Metrics};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::fanout::RealtimeEvent;
use super::manager::ConnectionCoordinator;
use crate::error::SyncError;
use crate::platform::ConnectivityEvent;
use crate::stores::{LocalEdit, SharedState};

/// A mounted consumer of realtime data.
///
/// Mounting registers a subscriber and attaches to (or opens) the shared
/// connection. Dropping the subscription releases it again; the connection
/// itself closes only once every subscription is gone.
pub struct RealtimeSubscription {
    coordinator: ConnectionCoordinator,
    tasks: Vec<JoinHandle<()>>,
}

impl RealtimeSubscription {
    pub(crate) fn mount(
        coordinator: ConnectionCoordinator,
        connectivity: Option<broadcast::Receiver<ConnectivityEvent>>,
    ) -> Self {
        coordinator.retain();
        coordinator.acquire();

        let mut tasks = Vec::with_capacity(2);
        if !coordinator.config().snapshot_stagger.is_empty() {
            tasks.push(spawn_staggered_snapshots(coordinator.clone()));
        }
        if let Some(events) = connectivity {
            tasks.push(spawn_connectivity_watch(coordinator.clone(), events));
        }

        Self { coordinator, tasks }
    }

    pub fn coordinator(&self) -> &ConnectionCoordinator {
        &self.coordinator
    }

    pub fn state(&self) -> SharedState {
        self.coordinator.state()
    }

    /// Receiver that wakes on every state change.
    pub fn changed(&self) -> watch::Receiver<SharedState> {
        self.coordinator.subscribe_state()
    }

    pub fn is_connected(&self) -> bool {
        self.coordinator.is_connected()
    }

    pub fn metrics(&self) -> Metrics {
        self.coordinator.metrics()
    }

    /// Re-request the full snapshot, reconnecting first if needed. A fresh
    /// connection asks for a snapshot on open by itself.
    pub fn refresh_data(&self) {
        if self.coordinator.is_connected() {
            if let Err(e) = self.coordinator.send(&ClientCommand::GetSnapshot) {
                crate::log_debug!("refresh not sent: {}", e);
            }
        } else {
            self.coordinator.reconnect_now();
        }
    }

    pub fn send_command(&self, command: &ClientCommand) -> Result<(), SyncError> {
        self.coordinator.send_command(command)
    }

    pub fn set_filter(&self, filters: Map<String, Value>) -> Result<(), SyncError> {
        self.coordinator.set_filter(filters)
    }

    /// Show a just-composed message until the server confirms it.
    pub fn stage_local_message(&self, customer_id: impl Into<CustomerId>, message: ConversationMessage) {
        self.coordinator.apply_local(LocalEdit::StageMessage {
            customer_id: customer_id.into(),
            message,
        });
    }

    pub fn request_notifications(&self, limit: u32) {
        self.coordinator.request_notifications(limit);
    }

    pub fn events(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.coordinator.events()
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.coordinator.release();
    }
}

/// Extra `get_snapshot` requests shortly after mount, independent of when the
/// handshake finishes. Requests made before the socket is open are dropped.
fn spawn_staggered_snapshots(coordinator: ConnectionCoordinator) -> JoinHandle<()> {
    let mounted_at = Instant::now();
    tokio::spawn(async move {
        let offsets = coordinator.config().snapshot_stagger.clone();
        for offset in offsets {
            tokio::time::sleep_until(mounted_at + offset).await;
            if let Err(e) = coordinator.send(&ClientCommand::GetSnapshot) {
                crate::log_debug!("staggered get_snapshot at {:?} skipped: {}", offset, e);
            }
        }
    })
}

fn spawn_connectivity_watch(
    coordinator: ConnectionCoordinator,
    mut events: broadcast::Receiver<ConnectivityEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if !coordinator.is_connected() {
                        crate::log_info!("{:?} signal while disconnected; reconnecting", event);
                        coordinator.reconnect_now();
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

//! Bookline Client - command line entry point
//!
//! Connects to the configured backend, paints from the cached snapshot and
//! logs the live feed until interrupted.

use std::sync::Arc;

use anyhow::Context;
use bookline_client::platform::SystemClock;
use bookline_client::storage::{FileStorage, Storage};
use bookline_client::{ConnectionCoordinator, RealtimeEvent, SnapshotCache, SyncConfig};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bookline_client::logging::init("bookline_client=debug,bookline::sync=info");

    let config = SyncConfig::from_env().context("invalid configuration")?;
    tracing::info!("Using endpoint {}", config.ws_url);

    let mut builder = ConnectionCoordinator::builder(config);
    match FileStorage::in_cache_dir("bookline") {
        Some(storage) => {
            let storage: Arc<dyn Storage> = Arc::new(storage);
            builder = builder.snapshot_cache(SnapshotCache::new(storage, Arc::new(SystemClock)));
        }
        None => tracing::warn!("No cache directory; starting without a snapshot cache"),
    }
    let coordinator = builder.build();

    let subscription = coordinator.mount();
    let cached = subscription.state();
    tracing::info!(
        "Restored {} customers and {} vacation periods from cache",
        cached.reservations.len(),
        cached.vacations.len()
    );

    let mut events = subscription.events();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(RealtimeEvent::Update(event)) => {
                    let state = subscription.state();
                    tracing::info!(
                        "{} -> {} active reservations, connected: {}",
                        event.kind(),
                        state.active_reservations().count(),
                        state.is_connected
                    );
                }
                Ok(RealtimeEvent::NotificationAdd(notification)) => {
                    tracing::info!("Notification: {}", notification.summary);
                }
                Ok(RealtimeEvent::NotificationHistory(history)) => {
                    tracing::info!("{} notifications in history", history.len());
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    coordinator.disconnect();
    drop(subscription);
    Ok(())
}

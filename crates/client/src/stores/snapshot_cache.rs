//! Time-boxed cache of the last reduced state for instant first paint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bookline_shared::{ConversationMessage, CustomerId, Reservation, VacationPeriod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::state::{SharedState, SyncState};
use crate::error::SyncError;
use crate::platform::Clock;
use crate::storage::{load_json, save_json, Storage};

pub const SNAPSHOT_CACHE_KEY: &str = "bookline.realtime.snapshot.v1";

/// What gets written: the data slices plus the write time. Connection flags
/// and locally staged messages are not worth restoring.
#[derive(Debug, Serialize, Deserialize)]
struct CachedSnapshot {
    written_at: DateTime<Utc>,
    #[serde(default)]
    reservations: HashMap<CustomerId, Vec<Reservation>>,
    #[serde(default)]
    conversations: HashMap<CustomerId, Vec<ConversationMessage>>,
    #[serde(default)]
    vacations: Vec<VacationPeriod>,
    #[serde(default)]
    last_update: Option<DateTime<Utc>>,
}

pub struct SnapshotCache {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    key: String,
}

impl SnapshotCache {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            key: SNAPSHOT_CACHE_KEY.to_string(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn persist(&self, state: &SyncState) -> Result<(), SyncError> {
        let entry = CachedSnapshot {
            written_at: self.clock.now(),
            reservations: state.reservations.clone(),
            conversations: state.conversations.clone(),
            vacations: state.vacations.clone(),
            last_update: state.last_update,
        };
        save_json(self.storage.as_ref(), &self.key, &entry)
    }

    /// The cached state if it was written less than `ttl` ago, otherwise an
    /// empty state. Read failures are logged and treated as a miss.
    pub fn load(&self, ttl: Duration) -> SyncState {
        let entry = match load_json::<CachedSnapshot>(self.storage.as_ref(), &self.key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return SyncState::default(),
            Err(e) => {
                crate::log_warn!("discarding unreadable snapshot cache: {}", e);
                return SyncState::default();
            }
        };

        match (self.clock.now() - entry.written_at).to_std() {
            Ok(age) if age < ttl => SyncState {
                reservations: entry.reservations,
                conversations: entry.conversations,
                vacations: entry.vacations,
                last_update: entry.last_update,
                ..SyncState::default()
            },
            _ => {
                crate::log_debug!("snapshot cache written at {} is stale", entry.written_at);
                SyncState::default()
            }
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(&self.key) {
            crate::log_warn!("failed to clear snapshot cache: {}", e);
        }
    }

    /// Persist every state published on `states`, latest value wins.
    ///
    /// Writes run on the blocking pool, off the reducer's path, and failures
    /// are only logged.
    pub fn spawn_writer(self: Arc<Self>, mut states: watch::Receiver<SharedState>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = states.borrow_and_update().clone();
                let cache = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || cache.persist(&state)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => crate::log_warn!("snapshot cache write failed: {}", e),
                    Err(e) => crate::log_warn!("snapshot cache write task failed: {}", e),
                }
            }
        })
    }
}

//! Platform adapters the sync core depends on instead of a host environment.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Wall-clock source used for cache freshness and update stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Host signals that a lost connection is worth retrying right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// The network came back.
    Online,
    /// The app became visible to the user again.
    Visible,
}

pub trait ConnectivitySignal: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent>;
}

/// Connectivity source fed by platform glue through [`ConnectivityHub::notify`].
#[derive(Debug, Clone)]
pub struct ConnectivityHub {
    sender: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    pub fn notify(&self, event: ConnectivityEvent) {
        // No listeners is fine; nobody is mounted.
        let _ = self.sender.send(event);
    }
}

impl Default for ConnectivityHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivitySignal for ConnectivityHub {
    fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.sender.subscribe()
    }
}

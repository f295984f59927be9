//! Transport abstraction shaped after the browser WebSocket.
//!
//! A connector constructs a link synchronously (construction may fail, like
//! `new WebSocket(url)` throwing). The link then reports `Opened`, any number
//! of `Frame`s and `Error`s, and finally exactly one `Closed`.

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::error::SyncError;

/// Observable state of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No transport and nobody constructing one.
    Idle,
    /// An `acquire()` holds the lock and is constructing a transport.
    Locked,
    /// Transport constructed, handshake in progress.
    Connecting,
    Open,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionStatus::Locked | ConnectionStatus::Connecting)
    }
}

/// Frames the client asks a transport to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Error(String),
    Closed { code: u16, reason: String },
}

/// Both ends of one transport instance as seen by the coordinator.
pub struct TransportLink {
    pub outbound: UnboundedSender<Outbound>,
    pub events: UnboundedReceiver<TransportEvent>,
}

pub trait TransportConnector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> Result<TransportLink, SyncError>;
}

mod connection_native;
pub mod scripted;

pub use connection_native::TungsteniteConnector;
pub use scripted::{ScriptedConnector, ScriptedLink};

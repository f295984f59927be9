//! In-memory transport driven by hand, for tests and offline demos.
//!
//! Every `connect` call creates a [`ScriptedLink`] whose events are injected
//! by the caller and whose outbound frames can be inspected.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};

use super::{Outbound, TransportConnector, TransportEvent, TransportLink};
use crate::error::SyncError;

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    links: Arc<Mutex<Vec<ScriptedLink>>>,
    failures: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` connect calls fail at construction time.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.links.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn links(&self) -> Vec<ScriptedLink> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The most recently created link.
    pub fn last(&self) -> Option<ScriptedLink> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl TransportConnector for ScriptedConnector {
    fn connect(&self, url: &str) -> Result<TransportLink, SyncError> {
        let pending_failures = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending_failures.is_ok() {
            return Err(SyncError::Transport("scripted construction failure".to_string()));
        }

        let (outbound_tx, outbound_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ScriptedLink {
                url: url.to_string(),
                events: events_tx,
                sent: Arc::new(Mutex::new(SentFrames {
                    receiver: outbound_rx,
                    seen: Vec::new(),
                })),
            });

        Ok(TransportLink {
            outbound: outbound_tx,
            events: events_rx,
        })
    }
}

struct SentFrames {
    receiver: UnboundedReceiver<Outbound>,
    seen: Vec<Outbound>,
}

/// The far end of one scripted transport.
#[derive(Clone)]
pub struct ScriptedLink {
    pub url: String,
    events: UnboundedSender<TransportEvent>,
    sent: Arc<Mutex<SentFrames>>,
}

impl ScriptedLink {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.unbounded_send(event);
    }

    pub fn open(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn frame(&self, raw: &str) {
        self.emit(TransportEvent::Frame(raw.to_string()));
    }

    pub fn error(&self, reason: &str) {
        self.emit(TransportEvent::Error(reason.to_string()));
    }

    pub fn close(&self, code: u16) {
        self.emit(TransportEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    /// Everything the client has written to this link so far.
    pub fn sent(&self) -> Vec<Outbound> {
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        while let Ok(Some(frame)) = sent.receiver.try_next() {
            sent.seen.push(frame);
        }
        sent.seen.clone()
    }

    /// `type` tags of the text frames written so far.
    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                Outbound::Text(json) => serde_json::from_str::<serde_json::Value>(&json)
                    .ok()?
                    .get("type")?
                    .as_str()
                    .map(str::to_string),
                Outbound::Close { .. } => None,
            })
            .collect()
    }

    /// Close codes the client requested on this link.
    pub fn close_requests(&self) -> Vec<u16> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                Outbound::Close { code, .. } => Some(code),
                Outbound::Text(_) => None,
            })
            .collect()
    }
}

//! Process-wide event channel for listeners outside the render path.
//!
//! Every reduced server event is re-published here as a
//! [`RealtimeEvent::Update`]. Reservation, conversation and vacation events
//! additionally produce an inbox [`Notification`]. Publishing goes through a
//! dispatcher task, so listeners never run inside the reducer's call stack and
//! always see events in receipt order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use bookline_shared::{CustomerId, MessageKind, ServerEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Notifications kept for `notification history` requests.
pub const NOTIFICATION_HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
    pub summary: String,
    pub received_at: DateTime<Utc>,
}

impl Notification {
    /// Inbox entry for events a person would want to hear about.
    pub fn for_event(event: &ServerEvent, received_at: DateTime<Utc>) -> Option<Self> {
        let (customer_id, summary) = match event {
            ServerEvent::ReservationCreated(r) => {
                let when = match (r.date, r.time_slot.as_deref()) {
                    (Some(date), Some(slot)) => format!(" on {date} at {slot}"),
                    (Some(date), None) => format!(" on {date}"),
                    _ => String::new(),
                };
                (r.customer_id.clone(), format!("New reservation {}{}", r.id, when))
            }
            ServerEvent::ReservationUpdated(r) => {
                (r.customer_id.clone(), format!("Reservation {} updated", r.id))
            }
            ServerEvent::ReservationCancelled(r) => {
                (r.customer_id.clone(), format!("Reservation {} cancelled", r.id))
            }
            ServerEvent::ReservationReinstated(r) => {
                (r.customer_id.clone(), format!("Reservation {} reinstated", r.id))
            }
            ServerEvent::ConversationNewMessage(c) => (
                Some(c.customer_id.clone()),
                format!("New message from {}", c.customer_id),
            ),
            ServerEvent::VacationPeriodUpdated(v) => (
                None,
                format!("Vacation periods updated ({} total)", v.periods.len()),
            ),
            ServerEvent::Snapshot(_)
            | ServerEvent::MetricsUpdated(_)
            | ServerEvent::Ping
            | ServerEvent::Pong => return None,
        };

        Some(Self {
            id: Uuid::new_v4(),
            kind: event.kind(),
            customer_id,
            summary,
            received_at,
        })
    }
}

/// Event types that can be dispatched to listeners
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// Any reduced server event, as received.
    Update(Arc<ServerEvent>),
    NotificationAdd(Notification),
    /// Most recent notifications, newest last.
    NotificationHistory(Vec<Notification>),
}

pub struct FanoutBridge {
    queue: mpsc::UnboundedSender<RealtimeEvent>,
    events: broadcast::Sender<RealtimeEvent>,
    history: Mutex<VecDeque<Notification>>,
}

impl FanoutBridge {
    /// Create the bridge and its dispatcher task. Must be called from within
    /// a Tokio runtime.
    pub fn new(capacity: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (queue, mut pending) = mpsc::unbounded_channel::<RealtimeEvent>();

        let dispatch = events.clone();
        tokio::spawn(async move {
            while let Some(event) = pending.recv().await {
                // No listeners is not an error.
                let _ = dispatch.send(event);
            }
        });

        Arc::new(Self {
            queue,
            events,
            history: Mutex::new(VecDeque::with_capacity(NOTIFICATION_HISTORY_CAP)),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events.subscribe()
    }

    /// Re-publish a reduced event. `notify` is false while a matching local
    /// change is inside its suppression window.
    pub fn publish(&self, event: ServerEvent, notify: bool, received_at: DateTime<Utc>) {
        let notification = if notify {
            Notification::for_event(&event, received_at)
        } else {
            None
        };

        self.enqueue(RealtimeEvent::Update(Arc::new(event)));

        if let Some(notification) = notification {
            {
                let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
                if history.len() == NOTIFICATION_HISTORY_CAP {
                    history.pop_front();
                }
                history.push_back(notification.clone());
            }
            self.enqueue(RealtimeEvent::NotificationAdd(notification));
        }
    }

    /// The last `limit` notifications, oldest first.
    pub fn history(&self, limit: usize) -> Vec<Notification> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn publish_history(&self, limit: usize) {
        self.enqueue(RealtimeEvent::NotificationHistory(self.history(limit)));
    }

    fn enqueue(&self, event: RealtimeEvent) {
        if self.queue.send(event).is_err() {
            crate::log_debug!("fan-out dispatcher has stopped; event dropped");
        }
    }
}

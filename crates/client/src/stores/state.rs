//! The synchronized state value shared by every consumer.

use std::collections::HashMap;
use std::sync::Arc;

use bookline_shared::{
    vacation_entities, ConversationMessage, CustomerId, Reservation, VacationEntity, VacationPeriod,
};
use chrono::{DateTime, Utc};

/// Immutable snapshot handed to consumers. Every change produces a new `Arc`.
pub type SharedState = Arc<SyncState>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    pub reservations: HashMap<CustomerId, Vec<Reservation>>,
    /// Chronological, in the order messages arrived.
    pub conversations: HashMap<CustomerId, Vec<ConversationMessage>>,
    pub vacations: Vec<VacationPeriod>,
    /// Locally composed messages not yet confirmed by the server.
    pub pending: HashMap<CustomerId, Vec<ConversationMessage>>,
    pub is_connected: bool,
    pub last_update: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn reservations_for(&self, customer_id: &str) -> &[Reservation] {
        self.reservations
            .get(customer_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Reservations that are not cancelled, across all customers.
    pub fn active_reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations
            .values()
            .flatten()
            .filter(|r| !r.is_cancelled())
    }

    pub fn conversation(&self, customer_id: &str) -> &[ConversationMessage] {
        self.conversations
            .get(customer_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn pending_for(&self, customer_id: &str) -> &[ConversationMessage] {
        self.pending
            .get(customer_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn vacation_entities(&self) -> Vec<VacationEntity> {
        vacation_entities(&self.vacations)
    }
}

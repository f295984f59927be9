//! Domain models carried by the realtime feed.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque customer identifier used to key reservations and conversations.
pub type CustomerId = String;

/// Free-form metrics object pushed by `metrics_updated`.
pub type Metrics = serde_json::Map<String, serde_json::Value>;

// --- Reservations ---

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    #[default]
    Active,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: String,
    /// Snapshots key reservations by customer, so entries inside a snapshot
    /// may omit this and inherit the map key.
    #[serde(default, alias = "customer", alias = "wa_id")]
    pub customer_id: CustomerId,
    pub date: NaiveDate,
    pub time_slot: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub status: ReservationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_cancelled(&self) -> bool {
        self.status == ReservationStatus::Cancelled
    }
}

// --- Conversations ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(alias = "message")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationMessage {
    /// Composite key consumers use to drop redelivered messages.
    ///
    /// The server does not replay missed messages across a reconnect, but it
    /// may deliver a message both live and inside the next snapshot. Two
    /// messages with the same timestamp and text are treated as one.
    pub fn dedup_key(&self) -> (Option<DateTime<Utc>>, &str) {
        (self.timestamp, self.text.as_str())
    }
}

/// Returns the conversation with later duplicates removed, keeping order.
pub fn dedup_conversation(messages: &[ConversationMessage]) -> Vec<ConversationMessage> {
    let mut seen = HashSet::new();
    messages
        .iter()
        .filter(|m| seen.insert(m.dedup_key()))
        .cloned()
        .collect()
}

// --- Vacations ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VacationPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl VacationPeriod {
    /// Identity derived from the date range only, so it survives server-side
    /// reordering of the period list.
    pub fn content_id(&self) -> String {
        let digest = Sha256::digest(format!("{}|{}", self.start, self.end).as_bytes());
        format!("vacation-{}", &hex::encode(digest)[..16])
    }
}

/// A vacation period shaped for calendar rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacationEntity {
    pub id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub title: Option<String>,
}

/// Builds calendar entities for a vacation list.
///
/// Ids are content hashes of `(start, end)`. Exact duplicates get an
/// occurrence suffix (`-2`, `-3`, ...), which is the only place list order
/// matters.
pub fn vacation_entities(periods: &[VacationPeriod]) -> Vec<VacationEntity> {
    let mut occurrences: HashMap<(NaiveDate, NaiveDate), usize> = HashMap::new();
    periods
        .iter()
        .map(|period| {
            let seen = occurrences.entry((period.start, period.end)).or_insert(0);
            *seen += 1;
            let id = if *seen == 1 {
                period.content_id()
            } else {
                format!("{}-{}", period.content_id(), seen)
            };
            VacationEntity {
                id,
                start: period.start,
                end: period.end,
                title: period.title.clone(),
            }
        })
        .collect()
}

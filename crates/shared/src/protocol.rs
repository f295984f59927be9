//! Realtime wire protocol: JSON text frames shaped `{"type": ..., "data": ...}`.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Rejected;
use crate::models::{
    ConversationMessage, CustomerId, Metrics, Reservation, ReservationStatus, VacationPeriod,
};

/// Close code the application uses for intentional disconnects.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when a connection drops without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Every message type the protocol knows about, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Snapshot,
    ReservationCreated,
    ReservationUpdated,
    ReservationCancelled,
    ReservationReinstated,
    ConversationNewMessage,
    VacationPeriodUpdated,
    MetricsUpdated,
    Ping,
    Pong,
    GetSnapshot,
    GetNotifications,
    SetFilter,
    VacationUpdate,
}

impl MessageKind {
    pub const ALL: [MessageKind; 14] = [
        MessageKind::Snapshot,
        MessageKind::ReservationCreated,
        MessageKind::ReservationUpdated,
        MessageKind::ReservationCancelled,
        MessageKind::ReservationReinstated,
        MessageKind::ConversationNewMessage,
        MessageKind::VacationPeriodUpdated,
        MessageKind::MetricsUpdated,
        MessageKind::Ping,
        MessageKind::Pong,
        MessageKind::GetSnapshot,
        MessageKind::GetNotifications,
        MessageKind::SetFilter,
        MessageKind::VacationUpdate,
    ];

    /// The `type` tag as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Snapshot => "snapshot",
            MessageKind::ReservationCreated => "reservation_created",
            MessageKind::ReservationUpdated => "reservation_updated",
            MessageKind::ReservationCancelled => "reservation_cancelled",
            MessageKind::ReservationReinstated => "reservation_reinstated",
            MessageKind::ConversationNewMessage => "conversation_new_message",
            MessageKind::VacationPeriodUpdated => "vacation_period_updated",
            MessageKind::MetricsUpdated => "metrics_updated",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::GetSnapshot => "get_snapshot",
            MessageKind::GetNotifications => "get_notifications",
            MessageKind::SetFilter => "set_filter",
            MessageKind::VacationUpdate => "vacation_update",
        }
    }

    pub fn is_client_to_server(self) -> bool {
        matches!(
            self,
            MessageKind::GetSnapshot
                | MessageKind::GetNotifications
                | MessageKind::SetFilter
                | MessageKind::VacationUpdate
                | MessageKind::Ping
        )
    }

    pub fn is_reservation_event(self) -> bool {
        matches!(
            self,
            MessageKind::ReservationCreated
                | MessageKind::ReservationUpdated
                | MessageKind::ReservationCancelled
                | MessageKind::ReservationReinstated
        )
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Server -> client ---

/// Full state pushed by the server; replaces every slice it carries.
///
/// Entries are decoded one by one. An entry that does not fit the schema is
/// left out so a single bad record cannot block the new baseline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SnapshotPayload {
    #[serde(default, deserialize_with = "lenient_by_customer")]
    pub reservations: HashMap<CustomerId, Vec<Reservation>>,
    #[serde(default, deserialize_with = "lenient_by_customer")]
    pub conversations: HashMap<CustomerId, Vec<ConversationMessage>>,
    #[serde(default, deserialize_with = "lenient_periods")]
    pub vacations: Vec<VacationPeriod>,
}

fn lenient_by_customer<'de, D, T>(deserializer: D) -> Result<HashMap<CustomerId, Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = HashMap::<CustomerId, Vec<serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter(|(customer_id, _)| !customer_id.trim().is_empty())
        .map(|(customer_id, entries)| {
            let kept: Vec<T> = entries
                .into_iter()
                .filter_map(|entry| serde_json::from_value(entry).ok())
                .collect();
            (customer_id, kept)
        })
        .collect())
}

fn lenient_periods<'de, D>(deserializer: D) -> Result<Vec<VacationPeriod>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<VacationPeriod>(entry).ok())
        .filter(|period| period.start <= period.end)
        .collect())
}

/// Reservation patch. Only `id` is required; cancellations usually carry
/// nothing else.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReservationPayload {
    #[serde(alias = "reservation_id")]
    pub id: String,
    #[serde(
        default,
        alias = "customer",
        alias = "wa_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub customer_id: Option<CustomerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_slot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReservationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationPayload {
    #[serde(alias = "customer", alias = "wa_id")]
    pub customer_id: CustomerId,
    #[serde(flatten)]
    pub message: ConversationMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VacationPayload {
    #[serde(default)]
    pub periods: Vec<VacationPeriod>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsPayload {
    #[serde(default)]
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Snapshot(SnapshotPayload),
    ReservationCreated(ReservationPayload),
    ReservationUpdated(ReservationPayload),
    ReservationCancelled(ReservationPayload),
    ReservationReinstated(ReservationPayload),
    ConversationNewMessage(ConversationPayload),
    VacationPeriodUpdated(VacationPayload),
    MetricsUpdated(MetricsPayload),
    Ping,
    Pong,
}

impl ServerEvent {
    pub fn kind(&self) -> MessageKind {
        match self {
            ServerEvent::Snapshot(_) => MessageKind::Snapshot,
            ServerEvent::ReservationCreated(_) => MessageKind::ReservationCreated,
            ServerEvent::ReservationUpdated(_) => MessageKind::ReservationUpdated,
            ServerEvent::ReservationCancelled(_) => MessageKind::ReservationCancelled,
            ServerEvent::ReservationReinstated(_) => MessageKind::ReservationReinstated,
            ServerEvent::ConversationNewMessage(_) => MessageKind::ConversationNewMessage,
            ServerEvent::VacationPeriodUpdated(_) => MessageKind::VacationPeriodUpdated,
            ServerEvent::MetricsUpdated(_) => MessageKind::MetricsUpdated,
            ServerEvent::Ping => MessageKind::Ping,
            ServerEvent::Pong => MessageKind::Pong,
        }
    }

    /// Keepalive traffic carries no state.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, ServerEvent::Ping | ServerEvent::Pong)
    }

    /// Checks the constraints serde cannot express.
    pub fn validate(&self) -> Result<(), Rejected> {
        match self {
            ServerEvent::Snapshot(snapshot) => {
                if snapshot.reservations.keys().any(|k| k.trim().is_empty())
                    || snapshot.conversations.keys().any(|k| k.trim().is_empty())
                {
                    return Err(Rejected::schema("snapshot has an empty customer id"));
                }
                validate_periods(&snapshot.vacations)
            }
            ServerEvent::ReservationCreated(r)
            | ServerEvent::ReservationUpdated(r)
            | ServerEvent::ReservationCancelled(r)
            | ServerEvent::ReservationReinstated(r) => {
                if r.id.trim().is_empty() {
                    return Err(Rejected::schema("reservation id is empty"));
                }
                if r.customer_id.as_deref().is_some_and(|c| c.trim().is_empty()) {
                    return Err(Rejected::schema("reservation customer id is empty"));
                }
                Ok(())
            }
            ServerEvent::ConversationNewMessage(c) => {
                if c.customer_id.trim().is_empty() {
                    return Err(Rejected::schema("conversation customer id is empty"));
                }
                if c.message.text.is_empty() {
                    return Err(Rejected::schema("conversation message has no text"));
                }
                Ok(())
            }
            ServerEvent::VacationPeriodUpdated(v) => validate_periods(&v.periods),
            ServerEvent::MetricsUpdated(_) | ServerEvent::Ping | ServerEvent::Pong => Ok(()),
        }
    }
}

fn validate_periods(periods: &[VacationPeriod]) -> Result<(), Rejected> {
    match periods.iter().find(|p| p.start > p.end) {
        Some(p) => Err(Rejected::schema(format!(
            "vacation period ends before it starts ({} > {})",
            p.start, p.end
        ))),
        None => Ok(()),
    }
}

// --- Client -> server ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    GetSnapshot,
    GetNotifications {
        limit: u32,
    },
    SetFilter {
        filters: serde_json::Map<String, serde_json::Value>,
    },
    VacationUpdate {
        periods: Vec<VacationPeriod>,
    },
    Ping,
}

impl ClientCommand {
    pub fn kind(&self) -> MessageKind {
        match self {
            ClientCommand::GetSnapshot => MessageKind::GetSnapshot,
            ClientCommand::GetNotifications { .. } => MessageKind::GetNotifications,
            ClientCommand::SetFilter { .. } => MessageKind::SetFilter,
            ClientCommand::VacationUpdate { .. } => MessageKind::VacationUpdate,
            ClientCommand::Ping => MessageKind::Ping,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// --- Codec ---

/// Parses and validates one inbound text frame.
///
/// Invalid JSON and schema violations are both rejections; a rejected frame
/// must be dropped without touching client state.
pub fn parse_frame(raw: &str) -> Result<ServerEvent, Rejected> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| Rejected::InvalidJson(e.to_string()))?;
    let event: ServerEvent =
        serde_json::from_value(value).map_err(|e| Rejected::Schema(e.to_string()))?;
    event.validate()?;
    Ok(event)
}

//! Pure state transitions for server events and local edits.
//!
//! `reduce` never panics and never mutates its input. Events that carry
//! nothing usable, and heartbeat or metrics traffic, return the same `Arc`
//! so consumers can skip re-rendering by pointer comparison.

use std::sync::Arc;

use bookline_shared::{
    ConversationMessage, ConversationPayload, CustomerId, Metrics, Reservation,
    ReservationPayload, ReservationStatus, ServerEvent, SnapshotPayload,
};

use super::state::{SharedState, SyncState};

/// Changes that originate on this client rather than the server.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEdit {
    /// Show a message the user just sent until the server echoes it back.
    StageMessage {
        customer_id: CustomerId,
        message: ConversationMessage,
    },
}

pub fn reduce(state: &SharedState, event: &ServerEvent) -> SharedState {
    match event {
        ServerEvent::Snapshot(snapshot) => apply_snapshot(state, snapshot),
        ServerEvent::ReservationCreated(payload) => apply_reservation(
            state,
            payload,
            Some(payload.status.unwrap_or(ReservationStatus::Active)),
        ),
        ServerEvent::ReservationUpdated(payload) => apply_reservation(state, payload, payload.status),
        ServerEvent::ReservationCancelled(payload) => {
            apply_reservation(state, payload, Some(ReservationStatus::Cancelled))
        }
        ServerEvent::ReservationReinstated(payload) => {
            apply_reservation(state, payload, Some(ReservationStatus::Active))
        }
        ServerEvent::ConversationNewMessage(payload) => apply_message(state, payload),
        ServerEvent::VacationPeriodUpdated(payload) => {
            if state.vacations == payload.periods {
                return Arc::clone(state);
            }
            let mut next = (**state).clone();
            next.vacations = payload.periods.clone();
            Arc::new(next)
        }
        ServerEvent::MetricsUpdated(_) | ServerEvent::Ping | ServerEvent::Pong => Arc::clone(state),
    }
}

/// Metrics live beside the state, not in it.
pub fn metrics_update(event: &ServerEvent) -> Option<&Metrics> {
    match event {
        ServerEvent::MetricsUpdated(payload) => Some(&payload.metrics),
        _ => None,
    }
}

pub fn apply_local(state: &SharedState, edit: &LocalEdit) -> SharedState {
    match edit {
        LocalEdit::StageMessage {
            customer_id,
            message,
        } => {
            let mut next = (**state).clone();
            next.pending
                .entry(customer_id.clone())
                .or_default()
                .push(message.clone());
            Arc::new(next)
        }
    }
}

fn apply_snapshot(state: &SyncState, snapshot: &SnapshotPayload) -> SharedState {
    let mut next = state.clone();
    next.reservations = snapshot
        .reservations
        .iter()
        .map(|(customer_id, reservations)| {
            let owned = reservations
                .iter()
                .cloned()
                .map(|mut r| {
                    if r.customer_id.is_empty() {
                        r.customer_id = customer_id.clone();
                    }
                    r
                })
                .collect();
            (customer_id.clone(), owned)
        })
        .collect();
    next.conversations = snapshot.conversations.clone();
    next.vacations = snapshot.vacations.clone();
    // The snapshot is the new baseline; anything staged locally is superseded.
    next.pending.clear();
    Arc::new(next)
}

fn apply_reservation(
    state: &SharedState,
    payload: &ReservationPayload,
    status: Option<ReservationStatus>,
) -> SharedState {
    let mut next = (**state).clone();

    match locate(&next, &payload.id, payload.customer_id.as_deref()) {
        Some((owner, index)) => {
            let target = payload.customer_id.clone().unwrap_or_else(|| owner.clone());
            let Some(list) = next.reservations.get_mut(&owner) else {
                return Arc::clone(state);
            };
            if target == owner {
                patch(&mut list[index], payload, status);
            } else {
                // Reassigned to another customer: move it.
                let mut reservation = list.remove(index);
                if list.is_empty() {
                    next.reservations.remove(&owner);
                }
                patch(&mut reservation, payload, status);
                reservation.customer_id = target.clone();
                next.reservations.entry(target).or_default().push(reservation);
            }
        }
        None => match build(payload, status) {
            Some(reservation) => next
                .reservations
                .entry(reservation.customer_id.clone())
                .or_default()
                .push(reservation),
            None => {
                crate::log_debug!(
                    reservation_id = %payload.id,
                    "ignoring patch for unknown reservation without customer, date and time slot"
                );
                return Arc::clone(state);
            }
        },
    }

    Arc::new(next)
}

/// Finds a reservation by id, looking under the hinted customer first.
fn locate(state: &SyncState, id: &str, hint: Option<&str>) -> Option<(CustomerId, usize)> {
    if let Some(customer_id) = hint {
        if let Some(index) = state
            .reservations
            .get(customer_id)
            .and_then(|list| list.iter().position(|r| r.id == id))
        {
            return Some((customer_id.to_string(), index));
        }
    }
    state.reservations.iter().find_map(|(customer_id, list)| {
        list.iter()
            .position(|r| r.id == id)
            .map(|index| (customer_id.clone(), index))
    })
}

fn patch(reservation: &mut Reservation, payload: &ReservationPayload, status: Option<ReservationStatus>) {
    if let Some(date) = payload.date {
        reservation.date = date;
    }
    if let Some(time_slot) = &payload.time_slot {
        reservation.time_slot = time_slot.clone();
    }
    if payload.customer_name.is_some() {
        reservation.customer_name = payload.customer_name.clone();
    }
    if payload.updated_at.is_some() {
        reservation.updated_at = payload.updated_at;
    }
    if let Some(status) = status {
        reservation.status = status;
    }
}

fn build(payload: &ReservationPayload, status: Option<ReservationStatus>) -> Option<Reservation> {
    Some(Reservation {
        id: payload.id.clone(),
        customer_id: payload.customer_id.clone()?,
        date: payload.date?,
        time_slot: payload.time_slot.clone()?,
        customer_name: payload.customer_name.clone(),
        status: status.unwrap_or_default(),
        updated_at: payload.updated_at,
    })
}

fn apply_message(state: &SyncState, payload: &ConversationPayload) -> SharedState {
    let mut next = state.clone();
    let key = payload.message.dedup_key();

    // The server echo replaces the locally staged copy.
    if let Some(pending) = next.pending.get_mut(&payload.customer_id) {
        if let Some(index) = pending.iter().position(|m| m.dedup_key() == key) {
            pending.remove(index);
        }
        if pending.is_empty() {
            next.pending.remove(&payload.customer_id);
        }
    }

    next.conversations
        .entry(payload.customer_id.clone())
        .or_default()
        .push(payload.message.clone());
    Arc::new(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookline_shared::{parse_frame, VacationPayload, VacationPeriod};

    fn event(raw: &str) -> ServerEvent {
        parse_frame(raw).unwrap()
    }

    fn created(id: &str, customer: &str) -> ServerEvent {
        event(&format!(
            r#"{{"type":"reservation_created","data":{{"id":"{id}","customer":"{customer}","date":"2024-05-01","time_slot":"11:00"}}}}"#
        ))
    }

    fn snapshot() -> ServerEvent {
        event(
            r#"{"type":"snapshot","data":{
                "reservations":{"c1":[{"id":"r1","date":"2024-05-01","time_slot":"11:00"}]},
                "conversations":{"c1":[{"role":"user","text":"hello"}]},
                "vacations":[{"start":"2024-08-01","end":"2024-08-10"}]
            }}"#,
        )
    }

    #[test]
    fn snapshot_replaces_slices_and_fills_customer_ids() {
        let before = Arc::new(SyncState::default());
        let after = reduce(&before, &snapshot());

        assert_eq!(after.reservations_for("c1")[0].customer_id, "c1");
        assert_eq!(after.conversation("c1").len(), 1);
        assert_eq!(after.vacations.len(), 1);
    }

    #[test]
    fn snapshot_is_idempotent() {
        let start = reduce(&Arc::new(SyncState::default()), &created("r9", "c9"));
        let once = reduce(&start, &snapshot());
        let twice = reduce(&once, &snapshot());
        assert_eq!(*once, *twice);
        assert!(once.reservations_for("c9").is_empty());
    }

    #[test]
    fn heartbeat_and_metrics_keep_the_same_reference() {
        let state = reduce(&Arc::new(SyncState::default()), &snapshot());
        assert!(Arc::ptr_eq(&state, &reduce(&state, &ServerEvent::Ping)));
        assert!(Arc::ptr_eq(&state, &reduce(&state, &ServerEvent::Pong)));

        let metrics = event(r#"{"type":"metrics_updated","data":{"metrics":{"active":3}}}"#);
        assert!(Arc::ptr_eq(&state, &reduce(&state, &metrics)));
        assert_eq!(metrics_update(&metrics).unwrap()["active"], 3);
    }

    #[test]
    fn cancellation_marks_in_place_and_reinstatement_restores() {
        let state = reduce(&Arc::new(SyncState::default()), &created("r1", "c1"));
        let cancelled = reduce(
            &state,
            &event(r#"{"type":"reservation_cancelled","data":{"id":"r1"}}"#),
        );

        let list = cancelled.reservations_for("c1");
        assert_eq!(list.len(), 1);
        assert!(list[0].is_cancelled());
        assert_eq!(cancelled.active_reservations().count(), 0);

        let reinstated = reduce(
            &cancelled,
            &event(r#"{"type":"reservation_reinstated","data":{"id":"r1"}}"#),
        );
        assert!(!reinstated.reservations_for("c1")[0].is_cancelled());
    }

    #[test]
    fn update_patches_fields_and_can_move_customers() {
        let state = reduce(&Arc::new(SyncState::default()), &created("r1", "c1"));

        let patched = reduce(
            &state,
            &event(r#"{"type":"reservation_updated","data":{"id":"r1","time_slot":"12:30"}}"#),
        );
        assert_eq!(patched.reservations_for("c1")[0].time_slot, "12:30");
        assert_eq!(patched.reservations_for("c1")[0].date.to_string(), "2024-05-01");

        let moved = reduce(
            &patched,
            &event(r#"{"type":"reservation_updated","data":{"id":"r1","customer_id":"c2"}}"#),
        );
        assert!(!moved.reservations.contains_key("c1"));
        assert_eq!(moved.reservations_for("c2")[0].customer_id, "c2");
    }

    #[test]
    fn created_twice_replaces_instead_of_duplicating() {
        let state = reduce(&Arc::new(SyncState::default()), &created("r1", "c1"));
        let again = reduce(&state, &created("r1", "c1"));
        assert_eq!(again.reservations_for("c1").len(), 1);
    }

    #[test]
    fn incomplete_patch_for_unknown_reservation_is_ignored() {
        let state = Arc::new(SyncState::default());
        let next = reduce(
            &state,
            &event(r#"{"type":"reservation_cancelled","data":{"id":"ghost"}}"#),
        );
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn messages_append_without_dedup_and_clear_matching_pending() {
        let text = "see you at noon";
        let staged = apply_local(
            &Arc::new(SyncState::default()),
            &LocalEdit::StageMessage {
                customer_id: "c1".into(),
                message: ConversationMessage {
                    role: Some("assistant".into()),
                    text: text.into(),
                    timestamp: None,
                },
            },
        );
        assert_eq!(staged.pending_for("c1").len(), 1);

        let echo = event(&format!(
            r#"{{"type":"conversation_new_message","data":{{"customer_id":"c1","role":"assistant","text":"{text}"}}}}"#
        ));
        let once = reduce(&staged, &echo);
        assert!(once.pending_for("c1").is_empty());

        let twice = reduce(&once, &echo);
        assert_eq!(twice.conversation("c1").len(), 2);
    }

    #[test]
    fn vacation_update_replaces_list() {
        let state = reduce(&Arc::new(SyncState::default()), &snapshot());
        let periods = vec![VacationPeriod {
            start: "2024-12-20".parse().unwrap(),
            end: "2024-12-31".parse().unwrap(),
            title: Some("Holidays".into()),
        }];
        let next = reduce(
            &state,
            &ServerEvent::VacationPeriodUpdated(VacationPayload {
                periods: periods.clone(),
            }),
        );
        assert_eq!(next.vacations, periods);
    }

    #[test]
    fn malformed_frame_between_valid_frames_changes_nothing() {
        let frames = [
            r#"{"type":"reservation_created","data":{"id":"r1","customer":"c1","date":"2024-05-01","time_slot":"11:00"}}"#,
            r#"{"type":"reservation_created","data":{"id":"#,
            r#"{"type":"reservation_cancelled","data":{"id":"r1"}}"#,
        ];

        fn fold(raw: &[&str]) -> SharedState {
            raw.iter()
                .filter_map(|f| parse_frame(f).ok())
                .fold(Arc::new(SyncState::default()), |s, e| reduce(&s, &e))
        }

        assert_eq!(*fold(&frames), *fold(&[frames[0], frames[2]]));
    }
}

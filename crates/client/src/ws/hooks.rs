//! Dioxus hooks over the realtime subscription.
//!
//! Components never talk to the socket. The root provides a
//! [`ConnectionCoordinator`] as context and each component that needs live
//! data calls [`use_realtime`], which keeps a subscription mounted for the
//! component's lifetime and mirrors the shared state into signals.

use std::rc::Rc;

use dioxus::prelude::*;

use super::manager::ConnectionCoordinator;
use super::subscription::RealtimeSubscription;
use crate::stores::SharedState;

/// Make `coordinator` available to every descendant component.
pub fn provide_realtime(coordinator: ConnectionCoordinator) -> ConnectionCoordinator {
    use_context_provider(move || coordinator)
}

#[derive(Clone)]
pub struct UseRealtime {
    pub state: Signal<SharedState>,
    pub connected: Signal<bool>,
    subscription: Rc<RealtimeSubscription>,
}

impl UseRealtime {
    pub fn subscription(&self) -> &RealtimeSubscription {
        &self.subscription
    }
}

/// Hook to mount a realtime subscription for the calling component.
pub fn use_realtime() -> UseRealtime {
    let coordinator = use_context::<ConnectionCoordinator>();

    let subscription = use_hook({
        let coordinator = coordinator.clone();
        move || Rc::new(coordinator.mount())
    });
    let mut state = use_signal({
        let coordinator = coordinator.clone();
        move || coordinator.state()
    });
    let mut connected = use_signal({
        let coordinator = coordinator.clone();
        move || coordinator.is_connected()
    });

    use_future(move || {
        let mut states = coordinator.subscribe_state();
        async move {
            while states.changed().await.is_ok() {
                let next = states.borrow_and_update().clone();
                connected.set(next.is_connected);
                state.set(next);
            }
        }
    });

    UseRealtime {
        state,
        connected,
        subscription,
    }
}

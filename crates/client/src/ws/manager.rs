//! The one shared connection and everything that arbitrates access to it.
//!
//! [`ConnectionCoordinator`] is a cheap, cloneable handle. All clones share a
//! single transport, subscriber count and reconnect schedule. State changes
//! are published through `watch` channels so readers never observe a
//! half-applied reduction.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bookline_shared::{
    parse_frame, ClientCommand, MessageKind, Metrics, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::connection::{
    ConnectionStatus, Outbound, TransportConnector, TransportEvent, TungsteniteConnector,
};
use super::fanout::{FanoutBridge, RealtimeEvent};
use super::heartbeat::Heartbeat;
use super::reconnect::is_unexpected_close;
use super::subscription::RealtimeSubscription;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::platform::{Clock, ConnectivitySignal, SystemClock};
use crate::stores::{self, LocalEdit, SharedState, SnapshotCache};

/// Transport lifecycle. Only `Connecting` and `Open` own a writable link.
enum Link {
    Idle,
    /// An `acquire()` is constructing a transport right now.
    Locked,
    Connecting {
        generation: u64,
        outbound: UnboundedSender<Outbound>,
    },
    Open {
        generation: u64,
        outbound: UnboundedSender<Outbound>,
    },
}

impl Link {
    fn status(&self) -> ConnectionStatus {
        match self {
            Link::Idle => ConnectionStatus::Idle,
            Link::Locked => ConnectionStatus::Locked,
            Link::Connecting { .. } => ConnectionStatus::Connecting,
            Link::Open { .. } => ConnectionStatus::Open,
        }
    }

    fn outbound(&self) -> Option<&UnboundedSender<Outbound>> {
        match self {
            Link::Connecting { outbound, .. } | Link::Open { outbound, .. } => Some(outbound),
            Link::Idle | Link::Locked => None,
        }
    }
}

struct Shared {
    link: Link,
    /// Bumped for every transport and for every intentional close. Events
    /// tagged with an older generation are ignored.
    generation: u64,
    subscribers: usize,
    attempt: u32,
    heartbeat: Heartbeat,
    active_filter: Option<Map<String, Value>>,
    /// Echo kinds whose next arrival should not raise a notification.
    suppressions: Vec<(MessageKind, Instant)>,
    reconnect_task: Option<JoinHandle<()>>,
    next_retry: Option<Duration>,
    acquire_retry: Option<JoinHandle<()>>,
    teardown_task: Option<JoinHandle<()>>,
}

impl Shared {
    fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
        self.next_retry = None;
    }

    fn cancel_teardown(&mut self) {
        if let Some(task) = self.teardown_task.take() {
            task.abort();
        }
    }

    fn cancel_acquire_retry(&mut self) {
        if let Some(task) = self.acquire_retry.take() {
            task.abort();
        }
    }

    fn take_suppression(&mut self, kind: MessageKind) -> bool {
        let now = Instant::now();
        self.suppressions.retain(|(_, until)| *until > now);
        match self.suppressions.iter().position(|(k, _)| *k == kind) {
            Some(index) => {
                self.suppressions.remove(index);
                true
            }
            None => false,
        }
    }
}

struct Inner {
    config: SyncConfig,
    connector: Arc<dyn TransportConnector>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<SharedState>,
    metrics: watch::Sender<Metrics>,
    status: watch::Sender<ConnectionStatus>,
    bridge: Arc<FanoutBridge>,
    shared: Mutex<Shared>,
}

/// Builder for [`ConnectionCoordinator`].
pub struct CoordinatorBuilder {
    config: SyncConfig,
    connector: Option<Arc<dyn TransportConnector>>,
    clock: Arc<dyn Clock>,
    cache: Option<SnapshotCache>,
}

impl CoordinatorBuilder {
    pub fn connector(mut self, connector: impl TransportConnector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Paint from this cache on startup and keep it updated afterwards.
    pub fn snapshot_cache(mut self, cache: SnapshotCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> ConnectionCoordinator {
        let initial = match &self.cache {
            Some(cache) => cache.load(self.config.snapshot_ttl),
            None => Default::default(),
        };
        let (state, _) = watch::channel(Arc::new(initial));
        let (metrics, _) = watch::channel(Metrics::new());
        let (status, _) = watch::channel(ConnectionStatus::Idle);

        if let Some(cache) = self.cache {
            Arc::new(cache).spawn_writer(state.subscribe());
        }

        let inner = Inner {
            bridge: FanoutBridge::new(self.config.event_capacity),
            shared: Mutex::new(Shared {
                link: Link::Idle,
                generation: 0,
                subscribers: 0,
                attempt: 0,
                heartbeat: Heartbeat::new(self.config.heartbeat_interval),
                active_filter: None,
                suppressions: Vec::new(),
                reconnect_task: None,
                next_retry: None,
                acquire_retry: None,
                teardown_task: None,
            }),
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(TungsteniteConnector)),
            clock: self.clock,
            config: self.config,
            state,
            metrics,
            status,
        };

        ConnectionCoordinator {
            inner: Arc::new(inner),
        }
    }
}

/// Owner of the single shared transport.
#[derive(Clone)]
pub struct ConnectionCoordinator {
    inner: Arc<Inner>,
}

impl ConnectionCoordinator {
    pub fn builder(config: SyncConfig) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            connector: None,
            clock: Arc::new(SystemClock),
            cache: None,
        }
    }

    /// Mount a consumer: counts as a subscriber until the returned value drops.
    pub fn mount(&self) -> RealtimeSubscription {
        RealtimeSubscription::mount(self.clone(), None)
    }

    /// Like [`mount`](Self::mount), and reconnects early when `signal` reports
    /// the network or the app coming back.
    pub fn mount_with_connectivity(&self, signal: &dyn ConnectivitySignal) -> RealtimeSubscription {
        RealtimeSubscription::mount(self.clone(), Some(signal.subscribe()))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Register a subscriber. Cancels a pending teardown.
    pub fn retain(&self) {
        let mut shared = self.inner.lock();
        shared.subscribers += 1;
        shared.cancel_teardown();
    }

    /// Attach to the shared transport, creating it if there is none.
    pub fn acquire(&self) {
        self.inner.acquire();
    }

    /// Drop a subscriber. The last one out closes the transport after the
    /// teardown grace period, unless someone mounts again in the meantime.
    pub fn release(&self) {
        self.inner.release();
    }

    /// Close the transport with a normal closure. Never retried.
    pub fn disconnect(&self) {
        self.inner.close_intentionally("disconnect requested");
    }

    /// Forget the backoff and connect now if not already connected.
    pub fn reconnect_now(&self) {
        {
            let mut shared = self.inner.lock();
            shared.attempt = 0;
            shared.cancel_reconnect();
        }
        self.inner.acquire();
    }

    /// Write a command to the open transport.
    pub fn send(&self, command: &ClientCommand) -> Result<(), SyncError> {
        let shared = self.inner.lock();
        match &shared.link {
            Link::Open { outbound, .. } => write(outbound, command),
            _ => Err(SyncError::NotConnected),
        }
    }

    /// Send a command with its local side effects: filters are remembered for
    /// later reconnects and vacation updates suppress their own echo.
    pub fn send_command(&self, command: &ClientCommand) -> Result<(), SyncError> {
        match command {
            ClientCommand::SetFilter { filters } => self.set_filter(filters.clone()),
            ClientCommand::VacationUpdate { .. } => {
                let mut shared = self.inner.lock();
                let Link::Open { outbound, .. } = &shared.link else {
                    return Err(SyncError::NotConnected);
                };
                write(outbound, command)?;
                let until = Instant::now() + self.inner.config.suppression_window;
                shared
                    .suppressions
                    .push((MessageKind::VacationPeriodUpdated, until));
                Ok(())
            }
            _ => self.send(command),
        }
    }

    /// Replace the server-side filter. It is re-sent on every open, so this
    /// succeeds while disconnected.
    pub fn set_filter(&self, filters: Map<String, Value>) -> Result<(), SyncError> {
        let mut shared = self.inner.lock();
        let command = ClientCommand::SetFilter {
            filters: filters.clone(),
        };
        shared.active_filter = Some(filters);
        match &shared.link {
            Link::Open { outbound, .. } => write(outbound, &command),
            _ => Ok(()),
        }
    }

    pub fn active_filter(&self) -> Option<Map<String, Value>> {
        self.inner.lock().active_filter.clone()
    }

    /// Ask the server for its notification list and publish the locally kept
    /// history to listeners.
    pub fn request_notifications(&self, limit: u32) {
        if let Err(e) = self.send(&ClientCommand::GetNotifications { limit }) {
            crate::log_debug!("get_notifications not sent: {}", e);
        }
        self.inner
            .bridge
            .publish_history(usize::try_from(limit).unwrap_or(usize::MAX));
    }

    pub fn apply_local(&self, edit: LocalEdit) {
        self.inner.state.send_if_modified(|current| {
            let next = stores::apply_local(current, &edit);
            if Arc::ptr_eq(&next, current) {
                return false;
            }
            *current = next;
            true
        });
    }

    pub fn state(&self) -> SharedState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SharedState> {
        self.inner.state.subscribe()
    }

    pub fn metrics(&self) -> Metrics {
        self.inner.metrics.borrow().clone()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<Metrics> {
        self.inner.metrics.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers
    }

    /// Abnormal closes since the last successful open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.lock().attempt
    }

    /// Delay of the scheduled reconnect, if one is pending.
    pub fn pending_reconnect_delay(&self) -> Option<Duration> {
        self.inner.lock().next_retry
    }

    pub fn events(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.inner.bridge.subscribe()
    }
}

fn write(outbound: &UnboundedSender<Outbound>, command: &ClientCommand) -> Result<(), SyncError> {
    let json = command.encode()?;
    outbound
        .unbounded_send(Outbound::Text(json))
        .map_err(|e| SyncError::Transport(e.to_string()))
}

/// Best-effort write for frames the coordinator sends on its own.
fn write_logged(outbound: &UnboundedSender<Outbound>, command: &ClientCommand) {
    if let Err(e) = write(outbound, command) {
        crate::log_debug!("{} not sent: {}", command.kind(), e);
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, shared: &mut Shared, link: Link) {
        shared.link = link;
        let status = shared.link.status();
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        self.set_connected(status.is_connected());
    }

    fn set_connected(&self, connected: bool) {
        self.state.send_if_modified(|current| {
            if current.is_connected == connected {
                return false;
            }
            Arc::make_mut(current).is_connected = connected;
            true
        });
    }

    fn acquire(self: &Arc<Self>) {
        let generation = {
            let mut shared = self.lock();
            match shared.link.status() {
                ConnectionStatus::Connecting | ConnectionStatus::Open => return,
                ConnectionStatus::Locked => {
                    self.schedule_acquire_retry(&mut shared);
                    return;
                }
                ConnectionStatus::Idle => {}
            }
            shared.cancel_reconnect();
            shared.generation += 1;
            self.transition(&mut shared, Link::Locked);
            shared.generation
        };

        crate::log_info!("Connecting to {}", self.config.ws_url);
        // Constructed without the lock held, so a nested acquire sees `Locked`.
        let result = self.connector.connect(&self.config.ws_url);

        let mut shared = self.lock();
        if shared.generation != generation || !matches!(shared.link, Link::Locked) {
            // Closed on purpose while the transport was being built.
            if let Ok(link) = result {
                let _ = link.outbound.unbounded_send(Outbound::Close {
                    code: NORMAL_CLOSURE,
                    reason: "superseded".to_string(),
                });
            }
            return;
        }

        match result {
            Ok(link) => {
                self.transition(
                    &mut shared,
                    Link::Connecting {
                        generation,
                        outbound: link.outbound,
                    },
                );
                spawn_pump(Arc::downgrade(self), generation, link.events);
            }
            Err(e) => {
                crate::log_warn!("Failed to create transport: {}", e);
                self.transition(&mut shared, Link::Idle);
                self.after_close(&mut shared, ABNORMAL_CLOSURE);
            }
        }
    }

    fn schedule_acquire_retry(self: &Arc<Self>, shared: &mut Shared) {
        if shared
            .acquire_retry
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }
        let weak = Arc::downgrade(self);
        let delay = self.config.acquire_retry_delay;
        shared.acquire_retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            let wanted = {
                let mut shared = inner.lock();
                shared.acquire_retry = None;
                shared.subscribers > 0
            };
            if wanted {
                inner.acquire();
            }
        }));
    }

    fn release(self: &Arc<Self>) {
        let mut shared = self.lock();
        shared.subscribers = shared.subscribers.saturating_sub(1);
        if shared.subscribers > 0 {
            return;
        }

        shared.cancel_teardown();
        let weak = Arc::downgrade(self);
        let grace = self.config.teardown_grace;
        shared.teardown_task = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(inner) = weak.upgrade() else { return };
            let idle = {
                let mut shared = inner.lock();
                shared.teardown_task = None;
                shared.subscribers == 0
            };
            if idle {
                inner.close_intentionally("no subscribers");
            }
        }));
    }

    fn close_intentionally(&self, reason: &str) {
        let mut shared = self.lock();
        shared.cancel_reconnect();
        shared.cancel_acquire_retry();
        shared.heartbeat.stop();
        shared.attempt = 0;
        shared.generation += 1;

        if let Some(outbound) = shared.link.outbound() {
            crate::log_info!("Closing connection: {}", reason);
            let _ = outbound.unbounded_send(Outbound::Close {
                code: NORMAL_CLOSURE,
                reason: reason.to_string(),
            });
        }
        self.transition(&mut shared, Link::Idle);
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_open(generation),
            TransportEvent::Frame(raw) => self.on_frame(generation, &raw),
            TransportEvent::Error(reason) => self.on_error(generation, &reason),
            TransportEvent::Closed { code, reason } => self.on_close(generation, code, &reason),
        }
    }

    fn on_open(&self, generation: u64) {
        let mut shared = self.lock();
        let outbound = match &shared.link {
            Link::Connecting {
                generation: current,
                outbound,
            } if *current == generation => outbound.clone(),
            _ => return,
        };

        crate::log_info!("Connected to {}", self.config.ws_url);
        shared.attempt = 0;
        shared.next_retry = None;
        shared.heartbeat.start(outbound.clone());
        if let Some(filters) = shared.active_filter.clone() {
            write_logged(&outbound, &ClientCommand::SetFilter { filters });
        }
        write_logged(&outbound, &ClientCommand::GetSnapshot);
        self.transition(
            &mut shared,
            Link::Open {
                generation,
                outbound,
            },
        );
    }

    fn on_frame(&self, generation: u64, raw: &str) {
        if self.lock().generation != generation {
            return;
        }

        let event = match parse_frame(raw) {
            Ok(event) => event,
            Err(e) => {
                crate::log_debug!("Dropping frame: {}", e);
                return;
            }
        };

        if let Some(metrics) = stores::metrics_update(&event) {
            self.metrics.send_replace(metrics.clone());
        }

        let now = self.clock.now();
        self.state.send_if_modified(|current| {
            let mut next = stores::reduce(current, &event);
            if Arc::ptr_eq(&next, current) {
                return false;
            }
            Arc::make_mut(&mut next).last_update = Some(now);
            *current = next;
            true
        });

        if event.is_heartbeat() {
            return;
        }
        let notify = !self.lock().take_suppression(event.kind());
        self.bridge.publish(event, notify, now);
    }

    fn on_error(&self, generation: u64, reason: &str) {
        crate::log_warn!("Transport error: {}", reason);
        let mut shared = self.lock();
        if shared.generation != generation {
            return;
        }
        if matches!(shared.link, Link::Connecting { .. }) {
            // Unblock future attempts; the close that follows decides on a retry.
            self.transition(&mut shared, Link::Idle);
        }
    }

    fn on_close(self: &Arc<Self>, generation: u64, code: u16, reason: &str) {
        let mut shared = self.lock();
        if shared.generation != generation {
            return;
        }
        crate::log_info!("Connection closed ({} {})", code, reason);
        shared.heartbeat.stop();
        self.transition(&mut shared, Link::Idle);
        self.after_close(&mut shared, code);
    }

    /// Schedule a reconnect for an unexpected close, within the attempt ceiling.
    fn after_close(self: &Arc<Self>, shared: &mut Shared, code: u16) {
        if !is_unexpected_close(code) || shared.subscribers == 0 {
            return;
        }
        let policy = &self.config.reconnect;
        if !policy.should_retry(shared.attempt) {
            crate::log_warn!(
                "Giving up after {} reconnect attempts; waiting for an external trigger",
                shared.attempt
            );
            return;
        }

        let delay = policy.delay_for_attempt(shared.attempt);
        shared.attempt += 1;
        crate::log_info!(
            "Reconnecting in {:?} (attempt {})",
            delay,
            shared.attempt
        );

        shared.cancel_reconnect();
        shared.next_retry = Some(delay);
        let weak = Arc::downgrade(self);
        shared.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            {
                let mut shared = inner.lock();
                shared.reconnect_task = None;
                shared.next_retry = None;
            }
            inner.acquire();
        }));
    }
}

/// Forward one transport's events into the coordinator, in order.
fn spawn_pump(weak: Weak<Inner>, generation: u64, mut events: UnboundedReceiver<TransportEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let Some(inner) = weak.upgrade() else { return };
            let closed = matches!(event, TransportEvent::Closed { .. });
            inner.handle_event(generation, event);
            if closed {
                return;
            }
        }
        // The transport vanished without a close event.
        if let Some(inner) = weak.upgrade() {
            inner.on_close(generation, ABNORMAL_CLOSURE, "transport dropped");
        }
    });
}

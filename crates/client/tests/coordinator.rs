//! Connection lifecycle of the shared coordinator, driven by a scripted
//! transport on a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bookline_client::error::SyncError;
use bookline_client::platform::{ConnectivityEvent, ConnectivityHub};
use bookline_client::ws::{
    ConnectionStatus, ReconnectConfig, ScriptedConnector, TransportConnector, TransportLink,
};
use bookline_client::{ConnectionCoordinator, SyncConfig};
use bookline_shared::{ABNORMAL_CLOSURE, NORMAL_CLOSURE};

fn config() -> SyncConfig {
    SyncConfig::new("ws://bookline.test/ws")
}

fn build(connector: &ScriptedConnector, config: SyncConfig) -> ConnectionCoordinator {
    ConnectionCoordinator::builder(config)
        .connector(connector.clone())
        .build()
}

/// Let every ready task run, moving the paused clock by `ms`.
async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_mounts_share_one_transport() {
    let connector = ScriptedConnector::new();
    let coordinator = build(&connector, config());

    let mounts: Vec<_> = (0..5).map(|_| coordinator.mount()).collect();
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(coordinator.subscriber_count(), 5);

    connector.last().unwrap().open();
    advance(1_000).await;

    assert_eq!(coordinator.status(), ConnectionStatus::Open);
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(connector.last().unwrap().url, "ws://bookline.test/ws");
    drop(mounts);
}

/// Calls `acquire()` again from inside transport construction, like a
/// duplicate mount pass racing the first one.
struct ReentrantConnector {
    inner: ScriptedConnector,
    coordinator: Arc<Mutex<Option<ConnectionCoordinator>>>,
    observed: Arc<Mutex<Vec<ConnectionStatus>>>,
}

impl TransportConnector for ReentrantConnector {
    fn connect(&self, url: &str) -> Result<TransportLink, SyncError> {
        let nested = self.coordinator.lock().unwrap().take();
        if let Some(coordinator) = nested {
            self.observed.lock().unwrap().push(coordinator.status());
            coordinator.acquire();
        }
        self.inner.connect(url)
    }
}

#[tokio::test(start_paused = true)]
async fn reentrant_acquire_waits_for_the_lock_instead_of_connecting() {
    let scripted = ScriptedConnector::new();
    let slot = Arc::new(Mutex::new(None));
    let observed = Arc::new(Mutex::new(Vec::new()));
    let coordinator = ConnectionCoordinator::builder(config())
        .connector(ReentrantConnector {
            inner: scripted.clone(),
            coordinator: slot.clone(),
            observed: observed.clone(),
        })
        .build();
    *slot.lock().unwrap() = Some(coordinator.clone());

    let _mount = coordinator.mount();
    assert_eq!(*observed.lock().unwrap(), [ConnectionStatus::Locked]);
    assert_eq!(scripted.connect_count(), 1);

    // The nested call retries after the short lock delay and attaches.
    advance(500).await;
    assert_eq!(scripted.connect_count(), 1);

    scripted.last().unwrap().open();
    advance(1).await;
    assert!(coordinator.is_connected());
    assert_eq!(scripted.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn last_unmount_closes_once_after_the_grace_period() {
    let connector = ScriptedConnector::new();
    let coordinator = build(&connector, config());

    let mut mounts: Vec<_> = (0..3).map(|_| coordinator.mount()).collect();
    let link = connector.last().unwrap();
    link.open();
    advance(1).await;

    mounts.truncate(1);
    advance(5_000).await;
    assert!(coordinator.is_connected());
    assert!(link.close_requests().is_empty());

    mounts.clear();
    assert_eq!(coordinator.subscriber_count(), 0);
    advance(400).await;
    assert!(link.close_requests().is_empty());

    advance(200).await;
    assert_eq!(link.close_requests(), [NORMAL_CLOSURE]);
    assert_eq!(coordinator.status(), ConnectionStatus::Idle);

    advance(60_000).await;
    assert_eq!(link.close_requests(), [NORMAL_CLOSURE]);
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn remount_within_grace_keeps_the_connection() {
    let connector = ScriptedConnector::new();
    let coordinator = build(&connector, config());

    let first = coordinator.mount();
    connector.last().unwrap().open();
    advance(1).await;

    drop(first);
    advance(300).await;
    let _second = coordinator.mount();
    advance(2_000).await;

    assert!(coordinator.is_connected());
    assert!(connector.last().unwrap().close_requests().is_empty());
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_schedules_a_jittered_retry() {
    let connector = ScriptedConnector::new();
    let coordinator = build(&connector, config());
    let reconnect = coordinator.config().reconnect.clone();

    let _mount = coordinator.mount();
    connector.last().unwrap().open();
    advance(1).await;
    assert_eq!(coordinator.reconnect_attempt(), 0);

    connector.last().unwrap().close(ABNORMAL_CLOSURE);
    advance(1).await;

    let delay = coordinator.pending_reconnect_delay().unwrap();
    assert!(delay >= reconnect.base_interval);
    assert!(delay <= reconnect.base_interval + reconnect.jitter);
    assert_eq!(coordinator.reconnect_attempt(), 1);
    assert!(!coordinator.is_connected());

    advance(2_100).await;
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(coordinator.pending_reconnect_delay(), None);

    connector.last().unwrap().open();
    advance(1).await;
    assert_eq!(coordinator.reconnect_attempt(), 0);
}

#[tokio::test(start_paused = true)]
async fn manual_disconnect_is_never_retried() {
    let connector = ScriptedConnector::new();
    let coordinator = build(&connector, config());

    let _mount = coordinator.mount();
    let link = connector.last().unwrap();
    link.open();
    advance(1).await;

    coordinator.disconnect();
    assert_eq!(link.close_requests(), [NORMAL_CLOSURE]);
    assert!(!coordinator.is_connected());

    // Whatever code the transport reports afterwards, the close was ours.
    link.close(ABNORMAL_CLOSURE);
    advance(60_000).await;
    assert_eq!(coordinator.pending_reconnect_delay(), None);
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn normal_close_from_server_is_not_retried() {
    let connector = ScriptedConnector::new();
    let coordinator = build(&connector, config());

    let _mount = coordinator.mount();
    connector.last().unwrap().open();
    advance(1).await;
    connector.last().unwrap().close(NORMAL_CLOSURE);
    advance(60_000).await;

    assert_eq!(connector.connect_count(), 1);
    assert_eq!(coordinator.status(), ConnectionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn construction_failure_is_retried_like_a_close() {
    let connector = ScriptedConnector::new();
    connector.fail_next(1);
    let coordinator = build(&connector, config());

    let _mount = coordinator.mount();
    assert_eq!(connector.connect_count(), 0);
    assert_eq!(coordinator.status(), ConnectionStatus::Idle);
    assert!(coordinator.pending_reconnect_delay().is_some());

    advance(2_100).await;
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(coordinator.status(), ConnectionStatus::Connecting);
}

#[tokio::test(start_paused = true)]
async fn error_event_unblocks_and_following_close_retries() {
    let connector = ScriptedConnector::new();
    let coordinator = build(&connector, config());

    let _mount = coordinator.mount();
    let link = connector.last().unwrap();
    link.error("handshake refused");
    advance(1).await;
    assert_eq!(coordinator.status(), ConnectionStatus::Idle);

    link.close(ABNORMAL_CLOSURE);
    advance(1).await;
    assert!(coordinator.pending_reconnect_delay().is_some());
}

#[tokio::test(start_paused = true)]
async fn attempt_ceiling_waits_for_an_external_trigger() {
    let connector = ScriptedConnector::new();
    connector.fail_next(usize::MAX);
    let hub = ConnectivityHub::new();
    let mut config = config();
    config.reconnect = ReconnectConfig {
        max_attempts: Some(2),
        jitter: Duration::ZERO,
        ..ReconnectConfig::default()
    };
    let coordinator = build(&connector, config);

    let _mount = coordinator.mount_with_connectivity(&hub);
    advance(10_000).await;
    assert_eq!(coordinator.reconnect_attempt(), 2);
    assert_eq!(coordinator.pending_reconnect_delay(), None);
    assert_eq!(connector.connect_count(), 0);

    connector.fail_next(0);
    hub.notify(ConnectivityEvent::Online);
    advance(1).await;
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(coordinator.status(), ConnectionStatus::Connecting);
}

#[tokio::test(start_paused = true)]
async fn visibility_regain_reconnects_before_the_backoff_fires() {
    let connector = ScriptedConnector::new();
    let hub = ConnectivityHub::new();
    let coordinator = build(&connector, config());

    let _mount = coordinator.mount_with_connectivity(&hub);
    connector.last().unwrap().open();
    advance(1).await;

    hub.notify(ConnectivityEvent::Visible);
    advance(1).await;
    assert_eq!(connector.connect_count(), 1);

    connector.last().unwrap().close(ABNORMAL_CLOSURE);
    advance(1).await;
    assert!(coordinator.pending_reconnect_delay().is_some());

    hub.notify(ConnectivityEvent::Visible);
    advance(1).await;
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(coordinator.pending_reconnect_delay(), None);
    assert_eq!(coordinator.reconnect_attempt(), 0);
}

#[tokio::test(start_paused = true)]
async fn no_retry_once_every_consumer_left() {
    let connector = ScriptedConnector::new();
    let coordinator = build(&connector, config());

    let mount = coordinator.mount();
    connector.last().unwrap().open();
    advance(1).await;
    drop(mount);
    connector.last().unwrap().close(ABNORMAL_CLOSURE);
    advance(60_000).await;

    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_runs_only_while_open() {
    let connector = ScriptedConnector::new();
    let coordinator = build(&connector, config());

    let _mount = coordinator.mount();
    let link = connector.last().unwrap();
    link.open();
    advance(50_100).await;
    let pings = link.sent_types().iter().filter(|t| *t == "ping").count();
    assert_eq!(pings, 2);

    link.close(NORMAL_CLOSURE);
    advance(100_000).await;
    let pings = link.sent_types().iter().filter(|t| *t == "ping").count();
    assert_eq!(pings, 2);
}

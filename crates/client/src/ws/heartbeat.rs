//! Keepalive pings on an open socket.

use std::time::Duration;

use bookline_shared::ClientCommand;
use futures_channel::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::connection::Outbound;

enum HeartbeatState {
    Idle,
    Active(JoinHandle<()>),
}

/// Sends a `ping` every `interval` while active. Owned by the coordinator,
/// which starts it on open and stops it on close.
pub struct Heartbeat {
    interval: Duration,
    state: HeartbeatState,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: HeartbeatState::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, HeartbeatState::Active(_))
    }

    pub fn start(&mut self, outbound: UnboundedSender<Outbound>) {
        self.stop();

        let ping = match ClientCommand::Ping.encode() {
            Ok(ping) => ping,
            Err(e) => {
                crate::log_error!("cannot encode heartbeat ping: {}", e);
                return;
            }
        };
        let period = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // Best effort; the next tick tries again.
                if let Err(e) = outbound.unbounded_send(Outbound::Text(ping.clone())) {
                    crate::log_debug!("heartbeat ping not sent: {}", e);
                }
            }
        });
        self.state = HeartbeatState::Active(task);
    }

    pub fn stop(&mut self) {
        if let HeartbeatState::Active(task) =
            std::mem::replace(&mut self.state, HeartbeatState::Idle)
        {
            task.abort();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_channel::mpsc::unbounded;

    fn drain(rx: &mut futures_channel::mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = rx.try_next() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test(start_paused = true)]
    async fn pings_on_interval_until_stopped() {
        let (tx, mut rx) = unbounded();
        let mut heartbeat = Heartbeat::new(Duration::from_secs(25));
        heartbeat.start(tx);
        assert!(heartbeat.is_active());

        tokio::time::sleep(Duration::from_secs(24)).await;
        assert!(drain(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_secs(27)).await;
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Outbound::Text(r#"{"type":"ping"}"#.to_string()));

        heartbeat.stop();
        assert!(!heartbeat.is_active());
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_does_not_stop_the_timer() {
        let (tx, rx) = unbounded();
        drop(rx);
        let mut heartbeat = Heartbeat::new(Duration::from_secs(1));
        heartbeat.start(tx);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(heartbeat.is_active());
    }
}

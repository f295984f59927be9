//! Native WebSocket transport using tokio-tungstenite.

use bookline_shared::{ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};

use super::{Outbound, TransportConnector, TransportEvent, TransportLink};
use crate::error::SyncError;

/// Close code for a close frame that carried no status.
const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TransportConnector for TungsteniteConnector {
    fn connect(&self, url: &str) -> Result<TransportLink, SyncError> {
        let url = url::Url::parse(url)
            .map_err(|e| SyncError::Transport(format!("invalid websocket URL {url:?}: {e}")))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Transport(format!("no async runtime: {e}")))?;

        let (outbound_tx, outbound_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        runtime.spawn(run_link(url.to_string(), outbound_rx, events_tx));

        Ok(TransportLink {
            outbound: outbound_tx,
            events: events_rx,
        })
    }
}

/// Drive one socket from handshake to close, reporting through `events`.
async fn run_link(
    url: String,
    mut outbound: UnboundedReceiver<Outbound>,
    events: UnboundedSender<TransportEvent>,
) {
    let emit = |event: TransportEvent| {
        // The coordinator dropped this link; nothing left to tell.
        let _ = events.unbounded_send(event);
    };

    // A close requested mid-handshake drops the pending socket right away.
    let mut handshake = std::pin::pin!(connect_async(url.as_str()));
    let ws_stream = loop {
        tokio::select! {
            result = &mut handshake => match result {
                Ok((ws_stream, _response)) => break ws_stream,
                Err(e) => {
                    crate::log_warn!("WebSocket handshake with {} failed: {}", url, e);
                    emit(TransportEvent::Error(e.to_string()));
                    emit(TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: e.to_string(),
                    });
                    return;
                }
            },
            command = outbound.next() => match command {
                Some(Outbound::Text(_)) => {
                    crate::log_debug!("Dropping frame for {}: handshake not finished", url);
                }
                Some(Outbound::Close { code, reason }) => {
                    crate::log_info!("WebSocket to {} abandoned during handshake ({})", url, reason);
                    emit(TransportEvent::Closed { code, reason });
                    return;
                }
                None => {
                    emit(TransportEvent::Closed {
                        code: NORMAL_CLOSURE,
                        reason: "client dropped the link".to_string(),
                    });
                    return;
                }
            },
        }
    };

    crate::log_info!("WebSocket connected to {}", url);
    emit(TransportEvent::Opened);

    let (mut write, mut read) = ws_stream.split();

    let (code, reason) = loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => emit(TransportEvent::Frame(text.to_string())),
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                        None => (NO_STATUS_RECEIVED, String::new()),
                    };
                }
                Some(Ok(_)) => {
                    // Binary, ping and pong frames; pongs are automatic.
                }
                Some(Err(e)) => {
                    crate::log_error!("WebSocket read error: {}", e);
                    emit(TransportEvent::Error(e.to_string()));
                    break (ABNORMAL_CLOSURE, e.to_string());
                }
                None => break (ABNORMAL_CLOSURE, "stream ended".to_string()),
            },
            command = outbound.next() => match command {
                Some(Outbound::Text(json)) => {
                    crate::log_debug!("Sending to {}: {}", url, json);
                    if let Err(e) = write.send(Message::Text(json.into())).await {
                        crate::log_error!("Send failed: {}", e);
                        emit(TransportEvent::Error(e.to_string()));
                        break (ABNORMAL_CLOSURE, e.to_string());
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        crate::log_debug!("Close frame not delivered: {}", e);
                    }
                    break (code, reason);
                }
                None => {
                    // Sender dropped
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: String::new().into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break (NORMAL_CLOSURE, "client dropped the link".to_string());
                }
            },
        }
    };

    crate::log_info!("WebSocket to {} closed ({} {})", url, code, reason);
    emit(TransportEvent::Closed { code, reason });
}

//! Client configuration from defaults and environment variables.

use std::time::Duration;

use url::Url;

use crate::error::SyncError;
use crate::ws::ReconnectConfig;

const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";
const DEFAULT_WS_PATH: &str = "/ws";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Fully resolved `ws://` or `wss://` endpoint.
    pub ws_url: String,
    /// Interval between keepalive pings on an open socket.
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectConfig,
    /// Delay before a losing `acquire()` retries while another one holds the lock.
    pub acquire_retry_delay: Duration,
    /// How long the subscriber count must stay at zero before the socket closes.
    pub teardown_grace: Duration,
    /// Maximum age of a cached snapshot that may be painted on startup.
    pub snapshot_ttl: Duration,
    /// Offsets (from mount) of the extra `get_snapshot` requests a consumer sends.
    pub snapshot_stagger: Vec<Duration>,
    /// How long a locally issued change suppresses the notification for its echo.
    pub suppression_window: Duration,
    /// Buffer size of the process-wide event channel.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            heartbeat_interval: Duration::from_secs(25),
            reconnect: ReconnectConfig::default(),
            acquire_retry_delay: Duration::from_millis(150),
            teardown_grace: Duration::from_millis(500),
            snapshot_ttl: Duration::from_secs(60 * 60),
            snapshot_stagger: vec![
                Duration::from_millis(50),
                Duration::from_millis(200),
                Duration::from_millis(500),
            ],
            suppression_window: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

impl SyncConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Self::default()
        }
    }

    /// Build configuration from environment variables.
    ///
    /// Environment variables:
    /// - `BOOKLINE_WS_URL`: explicit websocket endpoint (wins over `BOOKLINE_API_URL`)
    /// - `BOOKLINE_API_URL`: http(s) base the websocket endpoint is derived from
    /// - `BOOKLINE_WS_TOKEN`: optional token appended as the `token` query parameter
    /// - `BOOKLINE_HEARTBEAT_SECS`: keepalive interval (default: 25)
    /// - `BOOKLINE_RECONNECT_BASE_MS`: base reconnect interval (default: 1000)
    /// - `BOOKLINE_RECONNECT_CAP_MS`: reconnect delay cap (default: 30000)
    /// - `BOOKLINE_RECONNECT_JITTER_MS`: maximum random jitter (default: 1000)
    /// - `BOOKLINE_RECONNECT_MAX_ATTEMPTS`: attempt ceiling, 0 = unbounded (default: 0)
    /// - `BOOKLINE_SNAPSHOT_TTL_SECS`: cached snapshot freshness window (default: 3600)
    pub fn from_env() -> Result<Self, SyncError> {
        let mut config = Self::default();

        let base = std::env::var("BOOKLINE_WS_URL")
            .or_else(|_| std::env::var("BOOKLINE_API_URL"))
            .unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
        let token = std::env::var("BOOKLINE_WS_TOKEN").ok();
        config.ws_url = resolve_ws_url(&base, token.as_deref())?;

        if let Some(secs) = env_u64("BOOKLINE_HEARTBEAT_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("BOOKLINE_RECONNECT_BASE_MS")? {
            config.reconnect.base_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("BOOKLINE_RECONNECT_CAP_MS")? {
            config.reconnect.max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("BOOKLINE_RECONNECT_JITTER_MS")? {
            config.reconnect.jitter = Duration::from_millis(ms);
        }
        if let Some(max) = env_u64("BOOKLINE_RECONNECT_MAX_ATTEMPTS")? {
            config.reconnect.max_attempts = match u32::try_from(max) {
                Ok(0) => None,
                Ok(max) => Some(max),
                Err(_) => None,
            };
        }
        if let Some(secs) = env_u64("BOOKLINE_SNAPSHOT_TTL_SECS")? {
            config.snapshot_ttl = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, SyncError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SyncError::Config(format!("{name} must be a whole number, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

/// Turn an http(s) or ws(s) base URL into the websocket endpoint.
///
/// `http` becomes `ws` and `https` becomes `wss`. A base without a path gets
/// `/ws`; an existing path is kept as is.
pub fn resolve_ws_url(base: &str, token: Option<&str>) -> Result<String, SyncError> {
    let mut url = Url::parse(base.trim())
        .map_err(|e| SyncError::Config(format!("invalid realtime URL {base:?}: {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SyncError::Config(format!(
                "unsupported realtime URL scheme {other:?}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SyncError::Config(format!("cannot use scheme {scheme} for {base:?}")))?;

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(DEFAULT_WS_PATH);
    }
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        url.query_pairs_mut().append_pair("token", token);
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_base_becomes_ws_endpoint() {
        assert_eq!(
            resolve_ws_url("http://localhost:8000", None).unwrap(),
            "ws://localhost:8000/ws"
        );
        assert_eq!(
            resolve_ws_url("https://api.example.com/", None).unwrap(),
            "wss://api.example.com/ws"
        );
    }

    #[test]
    fn explicit_ws_path_is_kept() {
        assert_eq!(
            resolve_ws_url("wss://api.example.com/realtime", None).unwrap(),
            "wss://api.example.com/realtime"
        );
    }

    #[test]
    fn token_is_query_encoded() {
        assert_eq!(
            resolve_ws_url("http://localhost:8000", Some("a b&c")).unwrap(),
            "ws://localhost:8000/ws?token=a+b%26c"
        );
    }

    #[test]
    fn rejects_unusable_urls() {
        assert!(matches!(
            resolve_ws_url("ftp://example.com", None),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            resolve_ws_url("not a url", None),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn defaults_match_documented_timings() {
        let config = SyncConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(config.acquire_retry_delay, Duration::from_millis(150));
        assert_eq!(config.teardown_grace, Duration::from_millis(500));
        assert_eq!(config.snapshot_ttl, Duration::from_secs(3600));
        assert_eq!(config.snapshot_stagger.len(), 3);
        assert!(config.reconnect.max_attempts.is_none());
    }
}

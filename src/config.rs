/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

use crate::error::{StreamError, StreamResult};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_FMP_URL: &str = "wss://websockets.financialmodelingprep.com";

/// Tuning knobs shared by every stream. Built explicitly and handed to the
/// adapter constructors; nothing here is read lazily from the process.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Bound on the transport dial.
    pub handshake_timeout: Duration,
    /// How long `start` waits for the client to become operational.
    pub start_timeout: Duration,
    pub start_poll_interval: Duration,
    /// Base interval of the reconnect backoff.
    pub reconnect_interval: Duration,
    pub reconnect_attempts: u32,
    pub liveness_check: bool,
    pub liveness_tick: Duration,
    /// Maximum tolerated silence before a ping is sent.
    pub max_silent_period: Duration,
    pub ping_deadline: Duration,
    pub resubscribe_on_reconnect: bool,
    pub outbound_capacity: usize,
    pub quotes_capacity: usize,
    pub bars_capacity: usize,
    pub balances_capacity: usize,
    pub positions_capacity: usize,
    pub orders_capacity: usize,
    pub user_agent: String,
    pub fmp_url: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(45),
            start_timeout: Duration::from_secs(30),
            start_poll_interval: Duration::from_secs(1),
            reconnect_interval: Duration::from_secs(12),
            reconnect_attempts: 3 << 8,
            liveness_check: true,
            liveness_tick: Duration::from_secs(1),
            max_silent_period: Duration::from_secs(30),
            ping_deadline: Duration::from_millis(500),
            resubscribe_on_reconnect: true,
            outbound_capacity: 100,
            quotes_capacity: 1000,
            bars_capacity: 100,
            balances_capacity: 20,
            positions_capacity: 20,
            orders_capacity: 100,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            fmp_url: DEFAULT_FMP_URL.to_string(),
        }
    }
}

impl StreamConfig {
    /// Defaults overlaid with the `STREAM_*` environment variables.
    pub fn from_env() -> StreamResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`StreamConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> StreamResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "STREAM_HANDSHAKE_TIMEOUT_SECS")? {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "STREAM_START_TIMEOUT_SECS")? {
            config.start_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<f64, _>(&lookup, "STREAM_RECONNECT_INTERVAL_SECS")? {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(StreamError::Config(format!(
                    "STREAM_RECONNECT_INTERVAL_SECS must be positive, got {}",
                    secs
                )));
            }
            config.reconnect_interval = Duration::from_secs_f64(secs);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "STREAM_RECONNECT_ATTEMPTS")? {
            config.reconnect_attempts = attempts;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "STREAM_MAX_SILENT_SECS")? {
            config.max_silent_period = Duration::from_secs(secs);
        }
        if let Some(enabled) = parse_var::<bool, _>(&lookup, "STREAM_LIVENESS_CHECK")? {
            config.liveness_check = enabled;
        }
        if let Some(enabled) = parse_var::<bool, _>(&lookup, "STREAM_RESUBSCRIBE")? {
            config.resubscribe_on_reconnect = enabled;
        }
        if let Some(agent) = lookup("STREAM_USER_AGENT") {
            config.user_agent = agent;
        }
        if let Some(url) = lookup("STREAM_FMP_URL") {
            config.fmp_url = url;
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> StreamResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| StreamError::Config(format!("{}={:?}: {}", key, raw, e))),
    }
}

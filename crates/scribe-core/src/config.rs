use std::time::Duration;

use url::Url;

const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/ws";
const DEFAULT_FALLBACK_URL: &str = "http://127.0.0.1:8080/api/synthesize";

/// Bounded exponential backoff for reconnection attempts.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before 0-indexed reconnect attempt `attempt`:
    /// `min(base_delay * 2^attempt, max_delay)`. Deterministic: the delay
    /// sequence is part of the public contract.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Client configuration. `Default` gives local-development values; each
/// field can be overridden from the environment via `from_env()`.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub ws_url: Url,
    pub fallback_url: Url,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub request_timeout: Duration,
    pub watchdog_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: Url::parse(DEFAULT_WS_URL).expect("default ws url"),
            fallback_url: Url::parse(DEFAULT_FALLBACK_URL).expect("default fallback url"),
            heartbeat_interval: Duration::from_millis(30_000),
            pong_timeout: Duration::from_millis(90_000),
            reconnect: ReconnectPolicy::default(),
            request_timeout: Duration::from_millis(300_000),
            watchdog_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Build a config from the environment, falling back to defaults for
    /// unset or unparseable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ws_url: env_url("SCRIBE_WS_URL", defaults.ws_url),
            fallback_url: env_url("SCRIBE_FALLBACK_URL", defaults.fallback_url),
            heartbeat_interval: env_ms("SCRIBE_HEARTBEAT_MS", defaults.heartbeat_interval),
            pong_timeout: env_ms("SCRIBE_PONG_TIMEOUT_MS", defaults.pong_timeout),
            reconnect: ReconnectPolicy {
                base_delay: env_ms("SCRIBE_RECONNECT_BASE_MS", defaults.reconnect.base_delay),
                max_delay: env_ms("SCRIBE_RECONNECT_MAX_MS", defaults.reconnect.max_delay),
                max_attempts: env_u32(
                    "SCRIBE_RECONNECT_ATTEMPTS",
                    defaults.reconnect.max_attempts,
                ),
            },
            request_timeout: env_ms("SCRIBE_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            watchdog_timeout: env_opt_ms("SCRIBE_WATCHDOG_MS"),
        }
    }
}

fn env_url(name: &str, default: Url) -> Url {
    match std::env::var(name) {
        Ok(raw) => match Url::parse(&raw) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(var = name, value = %raw, error = %e, "invalid url, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_ms(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "invalid millisecond value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_opt_ms(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "invalid millisecond value, ignoring");
            None
        }
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u32>() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "invalid integer value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

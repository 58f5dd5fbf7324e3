//! Session configuration parsed from environment variables.

use std::time::Duration;

use crate::retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};

pub const DEFAULT_URL: &str = "ws://device.gz529.com/";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 2;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Websocket URL of the vendor server.
    pub url: String,
    /// Bound on opening the socket, per attempt.
    pub connect_timeout: Duration,
    /// Bound on waiting for the welcome frame, per attempt.
    pub handshake_timeout: Duration,
    /// Default bound on waiting for a command's reply.
    pub command_timeout: Duration,
    /// Bound on socket teardown in `close()`.
    pub close_timeout: Duration,
    pub retry: RetryPolicy,
    /// Allow overlapping commands. Matching is then best-effort by action.
    pub pipelining: bool,
    /// Reconnect in the background after the server drops a ready connection.
    pub auto_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            close_timeout: Duration::from_secs(DEFAULT_CLOSE_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            pipelining: false,
            auto_reconnect: false,
        }
    }
}

impl SessionConfig {
    /// Build config from environment variables. Unset or unparsable values
    /// fall back to the defaults.
    ///
    /// - `SOLAR_WS_URL`: default `ws://device.gz529.com/`
    /// - `SOLAR_CONNECT_TIMEOUT_SECS`: default 5
    /// - `SOLAR_HANDSHAKE_TIMEOUT_SECS`: default 5
    /// - `SOLAR_COMMAND_TIMEOUT_SECS`: default 10
    /// - `SOLAR_RETRY_ATTEMPTS`: default 3
    /// - `SOLAR_RETRY_DELAY_SECS`: default 2 (fixed delay)
    /// - `SOLAR_PIPELINING`: `true`/`false`, default false
    /// - `SOLAR_AUTO_RECONNECT`: `true`/`false`, default false
    #[must_use]
    pub fn from_env() -> Self {
        let url = std::env::var("SOLAR_WS_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_owned());
        let retry = RetryPolicy::Fixed {
            delay: Duration::from_secs(env_parse("SOLAR_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY_SECS)),
            max_attempts: env_parse("SOLAR_RETRY_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
        };

        Self {
            url,
            connect_timeout: Duration::from_secs(env_parse("SOLAR_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)),
            handshake_timeout: Duration::from_secs(env_parse(
                "SOLAR_HANDSHAKE_TIMEOUT_SECS",
                DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            )),
            command_timeout: Duration::from_secs(env_parse("SOLAR_COMMAND_TIMEOUT_SECS", DEFAULT_COMMAND_TIMEOUT_SECS)),
            close_timeout: Duration::from_secs(DEFAULT_CLOSE_TIMEOUT_SECS),
            retry,
            pipelining: env_parse("SOLAR_PIPELINING", false),
            auto_reconnect: env_parse("SOLAR_AUTO_RECONNECT", false),
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_pipelining(mut self, pipelining: bool) -> Self {
        self.pipelining = pipelining;
        self
    }

    #[must_use]
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

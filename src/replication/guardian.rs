// ABOUTME: Reconnect-with-backoff guardian wrapping one endpoint's connection lifecycle
// ABOUTME: Retries forever with a capped exponential delay that wraps back every N attempts

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::config::BackoffConfig;

/// Delay schedule for reconnect attempts.
///
/// `delay = base * factor * e^attempt`, capped at `max_delay`. The attempt
/// counter starts at 1 and wraps back to 1 when it reaches `max_attempts`, so
/// the delay is sawtooth-shaped rather than pinned at the ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            factor: config.factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay to sleep after the given failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self.base_delay.as_secs_f64() * self.factor * (attempt as f64).exp();
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Attempt counter value after a failure at `attempt`.
    pub fn next_attempt(&self, attempt: u32) -> u32 {
        let next = attempt.saturating_add(1);
        if next >= self.max_attempts {
            1
        } else {
            next
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

/// Something that can open a connection to one endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Send;

    /// Human-readable endpoint name for logs; must not contain secrets.
    fn endpoint(&self) -> String;

    async fn connect(&self) -> Result<Self::Connection>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Owns the reconnect state of one endpoint.
///
/// Each endpoint gets its own guardian; they share nothing.
pub struct Guardian<C: Connector> {
    connector: C,
    backoff: Backoff,
    state: ConnectionState,
    attempt: u32,
}

impl<C: Connector> Guardian<C> {
    pub fn new(connector: C, backoff: Backoff) -> Self {
        Self {
            connector,
            backoff,
            state: ConnectionState::Disconnected,
            attempt: 1,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Mark the connection as released, e.g. after the pass closed it.
    pub fn release(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Connect, sleeping and retrying until it succeeds. Never returns an error.
    pub async fn acquire(&mut self) -> C::Connection {
        loop {
            self.state = ConnectionState::Connecting;
            tracing::debug!(
                endpoint = %self.connector.endpoint(),
                attempt = self.attempt,
                "connecting"
            );

            match self.connector.connect().await {
                Ok(connection) => {
                    self.state = ConnectionState::Connected;
                    self.attempt = 1;
                    tracing::info!(endpoint = %self.connector.endpoint(), "connection established");
                    return connection;
                }
                Err(e) => {
                    let delay = self.record_failure();
                    tracing::error!(
                        endpoint = %self.connector.endpoint(),
                        attempt = self.attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "connection failed: {:#}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Apply one failed attempt: returns the delay for the current attempt and
    /// advances (or wraps) the counter.
    fn record_failure(&mut self) -> Duration {
        self.state = ConnectionState::Disconnected;
        let delay = self.backoff.delay_for(self.attempt);
        self.attempt = self.backoff.next_attempt(self.attempt);
        delay
    }
}

//! Timeouts, retry bounds and buffer sizes for the supervisor and relay.
//!
//! Pure values with builder setters; the binary fills them from CLI flags and
//! environment variables and checks them with [`validate_settings`].

use std::time::Duration;

use thiserror::Error;

/// Bounds for spawning, discovering and stopping tool servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// How long a new process has to answer the `initialize` handshake.
    pub readiness_timeout: Duration,
    /// How long a capability listing may take.
    pub discovery_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL.
    pub termination_grace: Duration,
    /// Retries for transient transport errors during discovery.
    pub discovery_retries: u8,
    /// First retry delay; doubles on each retry.
    pub retry_base_delay: Duration,
    /// Pause after spawn before checking the process is still alive.
    pub settle_delay: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_secs(30),
            discovery_timeout: Duration::from_secs(30),
            termination_grace: Duration::from_secs(5),
            discovery_retries: 2,
            retry_base_delay: Duration::from_millis(500),
            settle_delay: Duration::from_millis(200),
        }
    }
}

impl SupervisorSettings {
    #[must_use]
    pub const fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    #[must_use]
    pub const fn with_discovery_retries(mut self, retries: u8) -> Self {
        self.discovery_retries = retries;
        self
    }

    #[must_use]
    pub const fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// Bounds for streaming sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Longest silence tolerated from the runtime before the session fails.
    pub idle_timeout: Duration,
    /// First reconnect delay.
    pub backoff_base: Duration,
    /// Ceiling for a single reconnect delay.
    pub backoff_cap: Duration,
    /// Reconnect attempts before the session is failed.
    pub max_reconnect_attempts: u32,
    /// Events buffered per session ahead of the client.
    pub channel_capacity: usize,
    /// Emit the accumulated tokens as a `final` event when the runtime did not.
    pub emit_final_summary: bool,
    /// How long to wait for the runtime to acknowledge a cancel.
    pub cancel_grace: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(180),
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(8),
            max_reconnect_attempts: 5,
            channel_capacity: 256,
            emit_final_summary: true,
            cancel_grace: Duration::from_secs(5),
        }
    }
}

impl RelaySettings {
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, cap: Duration, max_attempts: u32) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_final_summary(mut self, enabled: bool) -> Self {
        self.emit_final_summary = enabled;
        self
    }

    #[must_use]
    pub const fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Backoff cap ({cap:?}) must not be below the base delay ({base:?})")]
    BackoffCapBelowBase { base: Duration, cap: Duration },

    #[error("Channel capacity must be between 1 and 65536, got {0}")]
    InvalidChannelCapacity(usize),
}

/// Validate supervisor and relay settings together.
pub fn validate_settings(
    supervisor: &SupervisorSettings,
    relay: &RelaySettings,
) -> Result<(), SettingsError> {
    let non_zero = [
        ("readiness_timeout", supervisor.readiness_timeout),
        ("discovery_timeout", supervisor.discovery_timeout),
        ("termination_grace", supervisor.termination_grace),
        ("idle_timeout", relay.idle_timeout),
        ("backoff_base", relay.backoff_base),
    ];
    if let Some(&(field, _)) = non_zero.iter().find(|(_, d)| d.is_zero()) {
        return Err(SettingsError::ZeroDuration(field));
    }

    if relay.backoff_cap < relay.backoff_base {
        return Err(SettingsError::BackoffCapBelowBase {
            base: relay.backoff_base,
            cap: relay.backoff_cap,
        });
    }

    if !(1..=65_536).contains(&relay.channel_capacity) {
        return Err(SettingsError::InvalidChannelCapacity(relay.channel_capacity));
    }

    Ok(())
}

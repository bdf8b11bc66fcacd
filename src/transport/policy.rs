use std::time::Duration;

/// Retry bounds for a stream, enforced by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

/// How hard the transport should try to keep a stream alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry: RetrySettings,
    /// Upper bound on the time from a connection attempt to `connected`.
    pub connection_timeout: Duration,
}

impl RetryPolicy {
    /// For sessions allocated by this process: the PTY is known to exist.
    pub const FRESH: Self = Self {
        retry: RetrySettings {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8_000),
        },
        connection_timeout: Duration::from_millis(10_000),
    };

    /// For sessions remembered from a previous run, which may be long gone.
    /// Fail fast so the user can restart instead of watching retries.
    pub const REHYDRATED: Self = Self {
        retry: RetrySettings {
            max_retries: 0,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(500),
        },
        connection_timeout: Duration::from_millis(1_500),
    };
}

impl RetrySettings {
    /// Backoff before retry number `attempt` (1-based): doubles from `initial_delay`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Whether a session was allocated by this process or remembered from before it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Fresh,
    Rehydrated,
}

impl SessionKind {
    pub fn policy(self) -> RetryPolicy {
        match self {
            SessionKind::Fresh => RetryPolicy::FRESH,
            SessionKind::Rehydrated => RetryPolicy::REHYDRATED,
        }
    }
}

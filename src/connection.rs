use std::time::Duration;

/// Lifecycle of the conversation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Waiting out the backoff before retry number `attempt`.
    Reconnecting { attempt: u32 },
    /// Retries are exhausted; only a manual reconnect leaves this state.
    GaveUp,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn label(self) -> String {
        match self {
            ConnectionState::Connecting => "Connecting…".to_string(),
            ConnectionState::Open => "Connected".to_string(),
            ConnectionState::Reconnecting { attempt } => format!("Reconnecting (attempt {attempt})…"),
            ConnectionState::GaveUp => "Disconnected. Reconnect manually.".to_string(),
            ConnectionState::Closed => "Closed".to_string(),
        }
    }
}

/// Capped linear backoff: retry `n` waits `step * n`, and there are at most
/// `max_attempts` retries per outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    step: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(step: Duration, max_attempts: u32) -> Self {
        Self { step, max_attempts }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 5)
    }
}

/// Connection bookkeeping owned by the transport: address, state and the
/// retry counter.
#[derive(Debug, Clone)]
pub struct Connection {
    address: String,
    state: ConnectionState,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl Connection {
    pub fn new(address: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            address: address.into(),
            state: ConnectionState::Connecting,
            attempts: 0,
            policy,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn on_connecting(&mut self) -> ConnectionState {
        self.state = ConnectionState::Connecting;
        self.state
    }

    pub fn on_open(&mut self) -> ConnectionState {
        self.attempts = 0;
        self.state = ConnectionState::Open;
        self.state
    }

    /// Register an unexpected close or failed connect. Returns the delay
    /// before the next retry, or `None` once the policy is exhausted.
    pub fn on_unexpected_close(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            self.state = ConnectionState::GaveUp;
            return None;
        }
        self.attempts += 1;
        self.state = ConnectionState::Reconnecting {
            attempt: self.attempts,
        };
        Some(self.policy.delay_for_attempt(self.attempts))
    }

    /// A manual reconnect starts a fresh outage budget.
    pub fn on_manual_reconnect(&mut self) -> ConnectionState {
        self.attempts = 0;
        self.on_connecting()
    }

    pub fn on_close(&mut self) -> ConnectionState {
        self.state = ConnectionState::Closed;
        self.state
    }
}

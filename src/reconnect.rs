//! Client-side reconnect policy: exponential backoff gated by a circuit
//! breaker. Pure state machine, no sockets; the transport loop asks it
//! whether to attempt, and reports opens and failures back.

use std::time::{Duration, Instant};

const BASE_DELAY_MS: f64 = 2000.0;
const GROWTH: f64 = 1.5;
const MAX_DELAY_MS: f64 = 30_000.0;
const MAX_ATTEMPTS: u32 = 5;
const BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Whether a connection attempt may proceed right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectDecision {
    Proceed,
    /// Circuit breaker is open; fast-fail without touching the network.
    BreakerOpen { remaining: Duration },
}

pub struct ReconnectController {
    state: LinkState,
    attempts: u32,
    breaker_open_until: Option<Instant>,
}

impl ReconnectController {
    pub fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
            attempts: 0,
            breaker_open_until: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn breaker_open(&self) -> bool {
        self.breaker_open_until.is_some()
    }

    pub fn begin_attempt(&mut self) -> ConnectDecision {
        self.begin_attempt_at(Instant::now())
    }

    /// Gate one connection attempt. Opens the breaker after `MAX_ATTEMPTS`
    /// consecutive failures; an open breaker fast-fails until its cooldown
    /// elapses, at which point the failure counter resets.
    pub fn begin_attempt_at(&mut self, now: Instant) -> ConnectDecision {
        if let Some(until) = self.breaker_open_until {
            if now < until {
                return ConnectDecision::BreakerOpen {
                    remaining: until - now,
                };
            }
            // Cooldown elapsed: close the breaker and start fresh.
            self.breaker_open_until = None;
            self.attempts = 0;
        }

        if self.attempts >= MAX_ATTEMPTS {
            let until = now + BREAKER_COOLDOWN;
            self.breaker_open_until = Some(until);
            return ConnectDecision::BreakerOpen {
                remaining: BREAKER_COOLDOWN,
            };
        }

        self.attempts += 1;
        self.state = LinkState::Connecting;
        ConnectDecision::Proceed
    }

    /// A successful open resets the failure counter and closes the breaker.
    pub fn on_open(&mut self) {
        self.state = LinkState::Connected;
        self.attempts = 0;
        self.breaker_open_until = None;
    }

    pub fn on_disconnect(&mut self) {
        self.state = LinkState::Disconnected;
    }

    /// Backoff before the next attempt: `min(base·growth^(attempt−1), cap)`.
    pub fn next_delay(&self) -> Duration {
        let exponent = self.attempts.saturating_sub(1);
        let delay_ms = (BASE_DELAY_MS * GROWTH.powi(exponent as i32)).min(MAX_DELAY_MS);
        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for ReconnectController {
    fn default() -> Self {
        Self::new()
    }
}

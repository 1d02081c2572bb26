//! Reconnect backoff policy.
//!
//! The session reports `Disconnected` and stops; whether and when to dial
//! again is an application decision. These helpers implement the usual one:
//! retry with exponentially growing delays, reset on success.

use embassy_time::{Duration, Instant};

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    min_delay: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl ReconnectPolicy {
    /// A policy that backs off from `min_delay`, doubling per failed attempt
    /// up to `max_delay`.
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            attempt: 0,
        }
    }

    /// The delay to wait before the next attempt. Each call counts as one
    /// failed attempt.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u64 << self.attempt.min(31);
        let ticks = self
            .min_delay
            .as_ticks()
            .saturating_mul(factor)
            .min(self.max_delay.as_ticks());
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_ticks(ticks)
    }

    /// Number of failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget the failure history; the next delay starts from `min_delay`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Deadline bookkeeping around a [`ReconnectPolicy`].
///
/// The application notes disconnects and successful connects; `due` says
/// when to issue the next `connect` call. The helper never touches the
/// client itself, so it composes with any driving loop.
#[derive(Debug)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    retry_at: Option<Instant>,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            retry_at: None,
        }
    }

    /// Arm a retry deadline after a lost or failed connection.
    pub fn note_disconnected(&mut self, now: Instant) {
        let delay = self.policy.next_delay();
        self.retry_at = Some(now + delay);
    }

    /// A connection attempt succeeded; the backoff starts over.
    pub fn note_connected(&mut self) {
        self.policy.reset();
        self.retry_at = None;
    }

    /// Whether the application should attempt to connect now.
    pub fn due(&self, now: Instant) -> bool {
        self.retry_at.is_some_and(|at| now >= at)
    }

    /// The armed retry deadline, if any — feed it to the driving loop's
    /// sleep alongside the client's own `next_deadline`.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }
}

//! Monotonic time helpers shared by the client and server engines.

use std::time::{Duration, Instant};

/// A point in monotonic time after which a read loop should give up.
///
/// Both the client engine's per-try read loop (§4.3 step 4c) and the
/// server engine's idle-buffer timeout (§4.4) are expressed as a
/// deadline computed once and checked on every wake.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    /// A deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Time remaining until the deadline, or `Duration::ZERO` if already expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// The underlying instant, for transport APIs that take a raw deadline.
    #[must_use]
    pub fn instant(self) -> Instant {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_deadline_is_not_expired() {
        let d = Deadline::after(Duration::from_secs(1));
        assert!(!d.is_expired());
        assert!(d.remaining() > Duration::ZERO);
    }

    #[test]
    fn zero_timeout_expires_immediately() {
        let d = Deadline::after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(1));
        assert!(d.is_expired());
        assert_eq!(d.remaining(), Duration::ZERO);
    }
}

//! Process-global MBAP transaction ID counter (§3, §5 "shared resources").
//!
//! RTU framing has no transaction ID; MBAP clients draw one from this
//! counter for every request so that responses can be matched even when
//! a connection is shared by more than one in-flight request.

use std::sync::atomic::{AtomicU16, Ordering};

static NEXT: AtomicU16 = AtomicU16::new(1);

/// Draw the next transaction ID, wrapping from `u16::MAX` back to `1`
/// rather than `0` — `0` is a valid wire value but reserved here so
/// callers can use it as an "unset" sentinel.
#[must_use]
pub fn next() -> u16 {
    loop {
        let current = NEXT.load(Ordering::Relaxed);
        let candidate = if current == u16::MAX { 1 } else { current + 1 };
        if NEXT
            .compare_exchange_weak(current, candidate, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_calls_differ() {
        let a = next();
        let b = next();
        assert_ne!(a, b);
    }

    #[test]
    fn never_returns_zero() {
        for _ in 0..10_000 {
            assert_ne!(next(), 0);
        }
    }
}

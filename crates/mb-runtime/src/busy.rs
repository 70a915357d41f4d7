//! Atomic busy counter with a scoped RAII guard (§4.5).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared, cloneable handle to a non-negative busy count.
#[derive(Clone, Default)]
pub struct BusyCounter(Arc<AtomicUsize>);

impl BusyCounter {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicUsize::new(0)))
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.count() > 0
    }

    /// Take a guard that increments the count now and decrements it on drop,
    /// on every exit path including a panic unwind.
    #[must_use]
    pub fn guard(&self) -> BusyGuard {
        BusyGuard::new(Arc::clone(&self.0))
    }
}

/// RAII guard pairing one increment with exactly one decrement.
pub struct BusyGuard(Arc<AtomicUsize>);

impl BusyGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_increments_and_decrements() {
        let counter = BusyCounter::new();
        assert!(!counter.is_busy());
        {
            let _g = counter.guard();
            assert_eq!(counter.count(), 1);
        }
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn nested_guards_stack() {
        let counter = BusyCounter::new();
        let g1 = counter.guard();
        let g2 = counter.guard();
        assert_eq!(counter.count(), 2);
        drop(g1);
        assert_eq!(counter.count(), 1);
        drop(g2);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn guard_releases_on_panic_unwind() {
        let counter = BusyCounter::new();
        let for_panic = counter.clone();
        let result = std::panic::catch_unwind(move || {
            let _g = for_panic.guard();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(counter.count(), 0);
    }
}

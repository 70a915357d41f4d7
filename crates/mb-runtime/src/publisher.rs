//! Publishes [`BaseState`] snapshots to observers, logging transitions (§4.5).

use mb_common::state::{BaseState, ConnState, UseState};
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tracing::trace;

/// Wraps a [`BaseState`] with a condvar so observers can both poll the
/// latest snapshot and block waiting for the next change.
pub struct BaseStatePublisher {
    inner: Mutex<BaseState>,
    condvar: Condvar,
}

impl Default for BaseStatePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseStatePublisher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BaseState::initial()),
            condvar: Condvar::new(),
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> BaseState {
        self.inner.lock().unwrap().clone()
    }

    /// Publish a full snapshot. Logs at `trace` when `use_state` or
    /// `conn_state` actually changed.
    pub fn publish(
        &self,
        use_state: UseState,
        conn_state: ConnState,
        action_name: Option<String>,
        last_reason: Option<String>,
        busy: bool,
    ) {
        let new_state = BaseState::new(use_state, conn_state, action_name, last_reason, busy);
        let mut guard = self.inner.lock().unwrap();
        if guard.use_state() != new_state.use_state() || guard.conn_state() != new_state.conn_state() {
            trace!(
                from_use = %guard.use_state(),
                to_use = %new_state.use_state(),
                from_conn = %guard.conn_state(),
                to_conn = %new_state.conn_state(),
                "base state transition"
            );
        }
        *guard = new_state;
        self.condvar.notify_all();
    }

    /// Publish a new `use_state`, carrying every other field forward.
    pub fn set_use_state(&self, use_state: UseState, reason: Option<String>) {
        let current = self.snapshot();
        self.publish(
            use_state,
            current.conn_state(),
            current.action_name().map(String::from),
            reason.or_else(|| current.last_reason().map(String::from)),
            current.is_busy(),
        );
    }

    /// Publish a new `conn_state`, carrying every other field forward.
    pub fn set_conn_state(&self, conn_state: ConnState) {
        let current = self.snapshot();
        self.publish(
            current.use_state(),
            conn_state,
            current.action_name().map(String::from),
            current.last_reason().map(String::from),
            current.is_busy(),
        );
    }

    /// Set (or clear) the name of the action currently being serviced.
    pub fn set_action_name(&self, action_name: Option<String>) {
        let current = self.snapshot();
        self.publish(
            current.use_state(),
            current.conn_state(),
            action_name,
            current.last_reason().map(String::from),
            current.is_busy(),
        );
    }

    /// Set the `online_busy` flag.
    pub fn set_busy(&self, busy: bool) {
        let current = self.snapshot();
        if current.is_busy() == busy {
            return;
        }
        self.publish(
            current.use_state(),
            current.conn_state(),
            current.action_name().map(String::from),
            current.last_reason().map(String::from),
            busy,
        );
    }

    /// Block until a new snapshot is published, or `timeout` elapses.
    #[must_use]
    pub fn wait_for_change(&self, timeout: Duration) -> BaseState {
        let guard = self.inner.lock().unwrap();
        let before = guard.timestamp();
        let (guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |s| s.timestamp() == before)
            .unwrap();
        guard.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_snapshot_is_undefined() {
        let publisher = BaseStatePublisher::new();
        let s = publisher.snapshot();
        assert_eq!(s.use_state(), UseState::Undefined);
        assert_eq!(s.conn_state(), ConnState::NotConnected);
    }

    #[test]
    fn set_use_state_preserves_other_fields() {
        let publisher = BaseStatePublisher::new();
        publisher.set_conn_state(ConnState::Connected);
        publisher.set_use_state(UseState::Online, None);
        let s = publisher.snapshot();
        assert_eq!(s.use_state(), UseState::Online);
        assert_eq!(s.conn_state(), ConnState::Connected);
    }

    #[test]
    fn wait_for_change_wakes_on_publish() {
        use std::sync::Arc;
        use std::thread;

        let publisher = Arc::new(BaseStatePublisher::new());
        let writer = Arc::clone(&publisher);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set_use_state(UseState::AttemptOnline, None);
        });

        let observed = publisher.wait_for_change(Duration::from_secs(1));
        assert_eq!(observed.use_state(), UseState::AttemptOnline);
        handle.join().unwrap();
    }
}

//! Bounded action queue (§4.5): deferred go-online/go-offline/service
//! actions, each with a client-visible completion handle.

use crate::publisher::BaseStatePublisher;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Outcome of a completed action.
///
/// `NotImplemented` is only ever produced by a [`crate::part::PartHandler`]
/// default method; the worker normalizes it away per
/// [`crate::part::PartConfig::base_methods_succeed`] before it reaches a caller.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// The action succeeded, optionally carrying a result value.
    Success {
        /// Caller-defined result value, e.g. a register read back.
        value: Option<i64>,
    },
    /// The action failed for the given reason.
    Failure {
        /// Human-readable failure reason.
        reason: String,
    },
    /// The handler did not override this hook.
    NotImplemented,
}

impl ActionOutcome {
    #[must_use]
    pub fn success() -> Self {
        Self::Success { value: None }
    }

    #[must_use]
    pub fn success_with(value: i64) -> Self {
        Self::Success { value: Some(value) }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Errors a caller can observe when submitting to an [`ActionQueue`].
#[derive(Debug, thiserror::Error)]
pub enum PartError {
    /// `stop_part` has already disabled the queue.
    #[error("action queue is closed")]
    QueueClosed,
    /// The bounded queue has no free slot.
    #[error("action queue is full (capacity {0})")]
    QueueFull(usize),
    /// `thread::Builder::spawn` failed.
    #[error("failed to spawn active part worker: {0}")]
    SpawnFailed(#[source] std::io::Error),
}

/// The client-visible handle to a submitted action's eventual completion.
pub struct ActionHandle {
    rx: Receiver<ActionOutcome>,
}

impl ActionHandle {
    /// Block until the action completes (or the part is dropped mid-run).
    #[must_use]
    pub fn wait(self) -> ActionOutcome {
        self.rx
            .recv()
            .unwrap_or_else(|_| ActionOutcome::failure("part stopped before the action ran"))
    }

    /// Wait up to `timeout` for completion.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ActionOutcome> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Which built-in hook an action invokes, if any.
pub(crate) enum ActionKind {
    GoOnline { and_initialize: bool },
    GoOffline,
    Custom,
}

pub(crate) struct Action<H> {
    pub name: String,
    pub kind: ActionKind,
    pub run: Box<dyn FnOnce(&mut H, &BaseStatePublisher) -> ActionOutcome + Send>,
    pub completion: Sender<ActionOutcome>,
}

/// A bounded FIFO of actions awaiting a worker thread, shared between
/// the submitting callers and the worker loop.
pub(crate) struct ActionQueue<H> {
    inner: Mutex<VecDeque<Action<H>>>,
    condvar: Condvar,
    enabled: AtomicBool,
    capacity: usize,
}

impl<H> ActionQueue<H> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            condvar: Condvar::new(),
            enabled: AtomicBool::new(true),
            capacity,
        }
    }

    pub(crate) fn submit(
        &self,
        name: impl Into<String>,
        kind: ActionKind,
        run: impl FnOnce(&mut H, &BaseStatePublisher) -> ActionOutcome + Send + 'static,
    ) -> Result<ActionHandle, PartError> {
        if !self.enabled.load(Ordering::Acquire) {
            return Err(PartError::QueueClosed);
        }
        let mut guard = self.inner.lock().unwrap();
        if guard.len() >= self.capacity {
            return Err(PartError::QueueFull(self.capacity));
        }
        let (tx, rx) = mpsc::channel();
        guard.push_back(Action {
            name: name.into(),
            kind,
            run: Box::new(run),
            completion: tx,
        });
        drop(guard);
        self.condvar.notify_one();
        Ok(ActionHandle { rx })
    }

    pub(crate) fn drain_up_to(&self, n: u8) -> Vec<Action<H>> {
        let mut guard = self.inner.lock().unwrap();
        let take = (n as usize).min(guard.len());
        guard.drain(..take).collect()
    }

    pub(crate) fn wait_for_work(&self, timeout: Duration) {
        let guard = self.inner.lock().unwrap();
        if guard.is_empty() {
            let _ = self.condvar.wait_timeout(guard, timeout);
        }
    }

    pub(crate) fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.condvar.notify_all();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_rejects_when_disabled() {
        let queue: ActionQueue<()> = ActionQueue::new(4);
        queue.disable();
        let err = queue
            .submit("x", ActionKind::Custom, |_, _| ActionOutcome::success())
            .unwrap_err();
        assert!(matches!(err, PartError::QueueClosed));
    }

    #[test]
    fn submit_rejects_when_full() {
        let queue: ActionQueue<()> = ActionQueue::new(1);
        queue
            .submit("a", ActionKind::Custom, |_, _| ActionOutcome::success())
            .unwrap();
        let err = queue
            .submit("b", ActionKind::Custom, |_, _| ActionOutcome::success())
            .unwrap_err();
        assert!(matches!(err, PartError::QueueFull(1)));
    }

    #[test]
    fn drain_up_to_respects_cap() {
        let queue: ActionQueue<()> = ActionQueue::new(8);
        for i in 0..5 {
            queue
                .submit(format!("a{i}"), ActionKind::Custom, |_, _| ActionOutcome::success())
                .unwrap();
        }
        let drained = queue.drain_up_to(3);
        assert_eq!(drained.len(), 3);
        assert!(!queue.is_empty());
    }
}

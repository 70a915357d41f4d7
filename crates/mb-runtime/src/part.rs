//! The active-part worker: one dedicated thread draining an
//! [`ActionQueue`], running a [`PartHandler`]'s hooks, and publishing a
//! [`BaseState`] (§4.5).

use crate::action::{Action, ActionHandle, ActionKind, ActionOutcome, ActionQueue, PartError};
use crate::busy::BusyCounter;
use crate::publisher::BaseStatePublisher;
use mb_common::state::{BaseState, UseState};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Go-online/go-offline policy and worker-loop timing (§4.5).
#[derive(Debug, Clone)]
pub struct PartConfig {
    /// Capacity of the bounded action queue.
    pub queue_capacity: usize,
    /// Actions drained per worker pass, clamped to `1..=100`.
    pub max_actions_per_pass: u8,
    /// Notifier wait when a pass drained nothing, clamped to `0..=500ms`.
    pub wait_time: Duration,
    /// Unimplemented handler hooks return success instead of failure.
    pub base_methods_succeed: bool,
    /// Drive `use_state` transitions around `go_online`.
    pub go_online_updates_use_state: bool,
    /// Allow landing in `online_uninitialized` instead of `online`.
    pub allow_online_uninitialized: bool,
    /// If the handler itself moved `use_state` away from `attempt_online`,
    /// leave its choice alone instead of overwriting it.
    pub accept_custom_change_from_attempt_online: bool,
    /// Drive `use_state` to `offline` before calling `go_offline`.
    pub go_offline_updates_use_state: bool,
    /// A failed `go_online` sets `attempt_online_failed` (the default).
    /// When false, it leaves `use_state` at `online` instead, matching
    /// the other source revision (§9 open question 1).
    pub go_online_failure_sets_attempt_online_failed: bool,
    /// Publish `main_thread_failed` when the worker catches a panic.
    pub use_main_thread_failed_on_panic: bool,
}

impl Default for PartConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_actions_per_pass: 10,
            wait_time: Duration::from_millis(100),
            base_methods_succeed: true,
            go_online_updates_use_state: true,
            allow_online_uninitialized: false,
            accept_custom_change_from_attempt_online: true,
            go_offline_updates_use_state: true,
            go_online_failure_sets_attempt_online_failed: true,
            use_main_thread_failed_on_panic: true,
        }
    }
}

impl PartConfig {
    fn clamped(mut self) -> Self {
        self.max_actions_per_pass = self.max_actions_per_pass.clamp(1, 100);
        self.wait_time = self.wait_time.min(Duration::from_millis(500));
        self
    }
}

/// Hooks the worker thread drives.
///
/// Default bodies answer [`ActionOutcome::NotImplemented`], leaving the
/// success/failure call to [`PartConfig::base_methods_succeed`].
pub trait PartHandler: Send + 'static {
    /// Bring the part online. `publisher` lets the handler drive its own
    /// `use_state` transition directly (see
    /// [`PartConfig::accept_custom_change_from_attempt_online`]).
    fn go_online(&mut self, and_initialize: bool, publisher: &BaseStatePublisher) -> ActionOutcome {
        let _ = (and_initialize, publisher);
        ActionOutcome::NotImplemented
    }

    /// Take the part offline.
    fn go_offline(&mut self, publisher: &BaseStatePublisher) -> ActionOutcome {
        let _ = publisher;
        ActionOutcome::NotImplemented
    }

    /// Called once per worker pass, whether or not any actions ran.
    fn main_loop_service(&mut self, publisher: &BaseStatePublisher) {
        let _ = publisher;
    }

    /// Run from the failure model when the worker catches a panic,
    /// before `main_thread_failed` is published.
    fn stopping_actions(&mut self) {}
}

/// One running active part: a worker thread, its action queue, and the
/// [`BaseState`] it publishes.
pub struct ActivePart<H> {
    queue: Arc<ActionQueue<H>>,
    publisher: Arc<BaseStatePublisher>,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl<H: PartHandler> ActivePart<H> {
    /// Spawn the worker thread and start running `handler`'s hooks.
    ///
    /// # Errors
    ///
    /// Returns [`PartError::SpawnFailed`] if the OS refuses to create the thread.
    pub fn spawn(name: impl Into<String>, handler: H, config: PartConfig) -> Result<Self, PartError> {
        let config = config.clamped();
        let queue = Arc::new(ActionQueue::new(config.queue_capacity));
        let publisher = Arc::new(BaseStatePublisher::new());
        let busy = BusyCounter::new();
        let stop_flag = Arc::new(AtomicBool::new(false));

        let worker_queue = Arc::clone(&queue);
        let worker_publisher = Arc::clone(&publisher);
        let worker_stop = Arc::clone(&stop_flag);

        let worker = thread::Builder::new()
            .name(name.into())
            .spawn(move || worker_loop(handler, &worker_queue, &worker_publisher, &busy, &worker_stop, &config))
            .map_err(PartError::SpawnFailed)?;

        Ok(Self {
            queue,
            publisher,
            stop_flag,
            worker: Some(worker),
        })
    }

    /// The most recently published snapshot.
    #[must_use]
    pub fn state(&self) -> BaseState {
        self.publisher.snapshot()
    }

    /// Submit a go-online action.
    pub fn go_online(&self, and_initialize: bool) -> Result<ActionHandle, PartError> {
        self.queue.submit(
            "go_online",
            ActionKind::GoOnline { and_initialize },
            move |handler, publisher| handler.go_online(and_initialize, publisher),
        )
    }

    /// Submit a go-offline action.
    pub fn go_offline(&self) -> Result<ActionHandle, PartError> {
        self.queue
            .submit("go_offline", ActionKind::GoOffline, |handler, publisher| {
                handler.go_offline(publisher)
            })
    }

    /// Submit an arbitrary named action.
    pub fn submit(
        &self,
        name: impl Into<String>,
        run: impl FnOnce(&mut H, &BaseStatePublisher) -> ActionOutcome + Send + 'static,
    ) -> Result<ActionHandle, PartError> {
        self.queue.submit(name, ActionKind::Custom, run)
    }

    /// Disable the queue, signal the worker, and block until it exits.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.queue.disable();
        self.stop_flag.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<H> Drop for ActivePart<H> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.queue.disable();
            self.stop_flag.store(true, Ordering::Release);
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
        }
    }
}

fn worker_loop<H: PartHandler>(
    mut handler: H,
    queue: &ActionQueue<H>,
    publisher: &BaseStatePublisher,
    busy: &BusyCounter,
    stop_flag: &AtomicBool,
    config: &PartConfig,
) {
    debug!("active part worker started");
    while !stop_flag.load(Ordering::Acquire) {
        let drained = queue.drain_up_to(config.max_actions_per_pass);
        let did_work = !drained.is_empty();

        if did_work {
            publisher.set_busy(true);
            let _busy_guard = busy.guard();
            for action in drained {
                let name = action.name.clone();
                publisher.set_action_name(Some(name));
                let result = panic::catch_unwind(AssertUnwindSafe(|| run_action(&mut handler, publisher, action, config)));
                if result.is_err() {
                    handle_worker_panic(&mut handler, publisher, queue, stop_flag, config);
                    return;
                }
            }
            publisher.set_action_name(None);
            publisher.set_busy(!queue.is_empty());
        }

        let serviced = panic::catch_unwind(AssertUnwindSafe(|| handler.main_loop_service(publisher)));
        if serviced.is_err() {
            handle_worker_panic(&mut handler, publisher, queue, stop_flag, config);
            return;
        }

        if !did_work {
            queue.wait_for_work(config.wait_time);
        }
    }
    debug!("active part worker stopped");
}

fn run_action<H: PartHandler>(
    handler: &mut H,
    publisher: &BaseStatePublisher,
    action: Action<H>,
    config: &PartConfig,
) -> ActionOutcome {
    let Action {
        kind,
        run,
        completion,
        ..
    } = action;

    let mut entry_use_state = None;
    match &kind {
        ActionKind::GoOffline if config.go_offline_updates_use_state => {
            publisher.set_use_state(UseState::Offline, None);
        }
        ActionKind::GoOnline { .. } if config.go_online_updates_use_state => {
            entry_use_state = Some(publisher.snapshot().use_state());
            publisher.set_use_state(UseState::AttemptOnline, None);
        }
        _ => {}
    }

    let raw = run(handler, publisher);
    let outcome = normalize(raw, config);

    if let ActionKind::GoOnline { and_initialize } = kind {
        if config.go_online_updates_use_state {
            let current = publisher.snapshot();
            let handler_took_over = config.accept_custom_change_from_attempt_online
                && current.use_state() != UseState::AttemptOnline;
            if !handler_took_over {
                match &outcome {
                    ActionOutcome::Success { .. } => {
                        let already_online = entry_use_state == Some(UseState::Online);
                        let target = if config.allow_online_uninitialized && !already_online && !and_initialize {
                            UseState::OnlineUninitialized
                        } else {
                            UseState::Online
                        };
                        publisher.set_use_state(target, None);
                    }
                    ActionOutcome::Failure { reason } => {
                        let target = if config.go_online_failure_sets_attempt_online_failed {
                            UseState::AttemptOnlineFailed
                        } else {
                            UseState::Online
                        };
                        publisher.set_use_state(target, Some(reason.clone()));
                    }
                    ActionOutcome::NotImplemented => unreachable!("normalize() removes NotImplemented"),
                }
            }
        }
    }

    let _ = completion.send(outcome.clone());
    outcome
}

fn normalize(raw: ActionOutcome, config: &PartConfig) -> ActionOutcome {
    match raw {
        ActionOutcome::NotImplemented => {
            if config.base_methods_succeed {
                ActionOutcome::success()
            } else {
                ActionOutcome::failure("not implemented")
            }
        }
        other => other,
    }
}

fn handle_worker_panic<H: PartHandler>(
    handler: &mut H,
    publisher: &BaseStatePublisher,
    queue: &ActionQueue<H>,
    stop_flag: &AtomicBool,
    config: &PartConfig,
) {
    error!("active part worker panicked, running failure model");
    queue.disable();
    let _ = panic::catch_unwind(AssertUnwindSafe(|| handler.stopping_actions()));
    if config.use_main_thread_failed_on_panic {
        publisher.set_use_state(UseState::MainThreadFailed, Some("worker thread panicked".into()));
    }
    stop_flag.store(true, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_common::state::ConnState;
    use std::sync::atomic::AtomicU32;

    struct CountingHandler {
        online_calls: Arc<AtomicU32>,
    }

    impl PartHandler for CountingHandler {
        fn go_online(&mut self, _and_initialize: bool, _publisher: &BaseStatePublisher) -> ActionOutcome {
            self.online_calls.fetch_add(1, Ordering::SeqCst);
            ActionOutcome::success()
        }
    }

    #[test]
    fn go_online_reaches_online_state() {
        let calls = Arc::new(AtomicU32::new(0));
        let part = ActivePart::spawn(
            "test-part",
            CountingHandler {
                online_calls: Arc::clone(&calls),
            },
            PartConfig::default(),
        )
        .unwrap();

        let handle = part.go_online(true).unwrap();
        let outcome = handle.wait();
        assert!(outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(part.state().use_state(), UseState::Online);
        part.stop();
    }

    struct PanicHandler;
    impl PartHandler for PanicHandler {
        fn go_online(&mut self, _and_initialize: bool, _publisher: &BaseStatePublisher) -> ActionOutcome {
            panic!("simulated handler failure");
        }
    }

    #[test]
    fn panic_in_action_sets_main_thread_failed() {
        let part = ActivePart::spawn("panicking-part", PanicHandler, PartConfig::default()).unwrap();
        let handle = part.go_online(false).unwrap();
        // The worker panics before it can send a completion; the channel
        // closing is the observable signal.
        let _ = handle.wait();

        let mut state = part.state();
        for _ in 0..50 {
            if state.use_state() == UseState::MainThreadFailed {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
            state = part.state();
        }
        assert_eq!(state.use_state(), UseState::MainThreadFailed);
        assert_eq!(state.conn_state(), ConnState::NotConnected);
        part.stop();
    }

    struct NotImplementedHandler;
    impl PartHandler for NotImplementedHandler {}

    #[test]
    fn unimplemented_go_offline_succeeds_by_default() {
        let part = ActivePart::spawn("default-part", NotImplementedHandler, PartConfig::default()).unwrap();
        let outcome = part.go_offline().unwrap().wait();
        assert!(outcome.is_success());
        assert_eq!(part.state().use_state(), UseState::Offline);
        part.stop();
    }
}

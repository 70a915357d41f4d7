//! Active-part glue (§4.5): wraps the client and server engines as
//! [`PartHandler`]s so the daemon can drive either role on a dedicated
//! worker thread with a supervised base state.

use crate::store::ProcessImage;
use mb_client::ClientEngine;
use mb_runtime::{ActionOutcome, BaseStatePublisher, PartHandler};
use mb_server::{RequestHandler, ServerEngine};
use mb_transport::Transport;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// Drives a [`ClientEngine`] from within an [`mb_runtime::ActivePart`].
///
/// Transactions themselves are run from ordinary `submit()` closures
/// (see `main.rs`); this handler only owns the connect/disconnect
/// lifecycle that `go_online`/`go_offline` drive.
pub struct ClientPart {
    pub engine: ClientEngine<Box<dyn Transport>>,
}

impl ClientPart {
    #[must_use]
    pub fn new(engine: ClientEngine<Box<dyn Transport>>) -> Self {
        Self { engine }
    }
}

impl PartHandler for ClientPart {
    fn go_online(&mut self, _and_initialize: bool, _publisher: &BaseStatePublisher) -> ActionOutcome {
        match self.engine.transport_mut().connect() {
            Ok(()) => ActionOutcome::success(),
            Err(e) => ActionOutcome::failure(format!("connect failed: {e}")),
        }
    }

    fn go_offline(&mut self, _publisher: &BaseStatePublisher) -> ActionOutcome {
        self.engine.transport_mut().disconnect();
        ActionOutcome::success()
    }
}

/// Drives a [`ServerEngine`] from within an [`mb_runtime::ActivePart`],
/// polling it once per worker pass and periodically persisting its
/// process image.
pub struct ServerPart<H: RequestHandler + 'static> {
    engine: ServerEngine<Box<dyn Transport>, H>,
    image: Arc<Mutex<ProcessImage>>,
    store: mb_persist::RingStore,
    spin_period: Duration,
    save_interval: Duration,
    last_saved: Instant,
}

impl<H: RequestHandler + 'static> ServerPart<H> {
    #[must_use]
    pub fn new(
        engine: ServerEngine<Box<dyn Transport>, H>,
        image: Arc<Mutex<ProcessImage>>,
        store: mb_persist::RingStore,
        spin_period: Duration,
        save_interval: Duration,
    ) -> Self {
        Self {
            engine,
            image,
            store,
            spin_period,
            save_interval,
            last_saved: Instant::now(),
        }
    }

    fn save_if_due(&mut self) {
        if self.last_saved.elapsed() < self.save_interval {
            return;
        }
        self.save_now();
    }

    fn save_now(&mut self) {
        let mut snapshot = self.image.lock().unwrap().clone();
        match self.store.save(&mut snapshot) {
            Ok(()) => *self.image.lock().unwrap() = snapshot,
            Err(e) => warn!(error = %e, "failed to persist process image"),
        }
        self.last_saved = Instant::now();
    }
}

impl<H: RequestHandler + 'static> PartHandler for ServerPart<H> {
    fn go_online(&mut self, _and_initialize: bool, _publisher: &BaseStatePublisher) -> ActionOutcome {
        match self.engine.transport_mut().connect() {
            Ok(()) => ActionOutcome::success(),
            Err(e) => ActionOutcome::failure(format!("connect failed: {e}")),
        }
    }

    fn go_offline(&mut self, _publisher: &BaseStatePublisher) -> ActionOutcome {
        self.engine.transport_mut().disconnect();
        ActionOutcome::success()
    }

    fn main_loop_service(&mut self, _publisher: &BaseStatePublisher) {
        if let Err(e) = self.engine.poll(self.spin_period) {
            warn!(error = %e, "server poll failed");
        }
        self.save_if_due();
    }

    fn stopping_actions(&mut self) {
        self.save_now();
    }
}

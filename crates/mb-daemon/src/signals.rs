//! Signal handling for graceful daemon shutdown.
//!
//! Unix signal handling (SIGTERM, SIGINT, SIGHUP) for the daemon's
//! main loop. Uses atomic flags to communicate shutdown/reload
//! requests without blocking the signal handler itself.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Signal types the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - graceful termination request.
    Terminate,
    /// SIGINT - interrupt (Ctrl+C).
    Interrupt,
    /// SIGHUP - hangup, used here for config reload.
    Hangup,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// Shared state updated by the signal handler and polled by the main loop.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    reload_requested: AtomicBool,
    signal_count: AtomicU32,
}

impl SignalState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Check and clear the reload flag in one step.
    #[inline]
    pub fn take_reload_request(&self) -> bool {
        self.reload_requested.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    pub fn request_reload(&self) {
        self.reload_requested.store(true, Ordering::Relaxed);
    }

    fn record_signal(&self) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }
}

/// Handle for signal management, cheap to clone and share across threads.
#[derive(Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Create a handler and register Unix signal handlers.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the background poll thread fails to spawn.
    pub fn new() -> std::io::Result<Self> {
        let state = Arc::new(SignalState::new());
        let handler = Self {
            state: Arc::clone(&state),
        };

        #[cfg(unix)]
        handler.register_unix_handlers()?;

        Ok(handler)
    }

    #[cfg(unix)]
    fn register_unix_handlers(&self) -> std::io::Result<()> {
        use std::os::raw::c_int;

        static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
        static RELOAD_FLAG: AtomicBool = AtomicBool::new(false);

        let state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("mb-daemon-signals".into())
            .spawn(move || loop {
                if SHUTDOWN_FLAG.swap(false, Ordering::Relaxed) {
                    info!(signal = %SignalKind::Terminate, "shutdown signal received");
                    state.request_shutdown();
                    state.record_signal();
                }
                if RELOAD_FLAG.swap(false, Ordering::Relaxed) {
                    info!(signal = %SignalKind::Hangup, "reload signal received");
                    state.request_reload();
                    state.record_signal();
                }
                if state.shutdown_requested() {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(10));
            })?;

        unsafe {
            libc::signal(libc::SIGTERM, sigterm_handler as libc::sighandler_t);
            libc::signal(libc::SIGINT, sigint_handler as libc::sighandler_t);
            libc::signal(libc::SIGHUP, sighup_handler as libc::sighandler_t);
        }

        extern "C" fn sigterm_handler(_: c_int) {
            SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn sigint_handler(_: c_int) {
            SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn sighup_handler(_: c_int) {
            RELOAD_FLAG.store(true, Ordering::Relaxed);
        }

        debug!("Unix signal handlers registered");
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    #[inline]
    pub fn take_reload_request(&self) -> bool {
        self.state.take_reload_request()
    }

    pub fn request_shutdown(&self) {
        info!("manual shutdown requested");
        self.state.request_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_no_requests() {
        let state = SignalState::new();
        assert!(!state.shutdown_requested());
        assert!(!state.take_reload_request());
        assert_eq!(state.signal_count(), 0);
    }

    #[test]
    fn reload_flag_clears_on_take() {
        let state = SignalState::new();
        state.request_reload();
        assert!(state.take_reload_request());
        assert!(!state.take_reload_request());
    }

    #[test]
    fn manual_shutdown_is_observable() {
        let handler = SignalHandler::new().unwrap();
        assert!(!handler.shutdown_requested());
        handler.request_shutdown();
        assert!(handler.shutdown_requested());
    }
}

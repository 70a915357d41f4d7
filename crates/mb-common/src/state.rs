//! Base-state model published by active parts (§3, §4.5).
//!
//! `BaseState` is the externally visible health record of an active
//! part: a `use_state` × `conn_state` pair, the action currently being
//! serviced, the last failure reason, and a set of derived predicates.
//! Each publication is a fresh, immutable snapshot — observers never
//! see a value mutate out from under them.

use std::fmt;
use std::time::Instant;

/// The "am I supposed to be doing work" axis of a part's state.
///
/// Starts `Undefined` until `go_online`/`go_offline` has run at least
/// once (`is_defined` is false until then).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseState {
    /// Never transitioned; no go-online/go-offline call has completed.
    Undefined,
    /// A go-online action is in progress.
    AttemptOnline,
    /// Online and fully initialized.
    Online,
    /// Online, but initialization was explicitly skipped
    /// (`go_online_updates_use_state` + not `and_initialize`, §4.5).
    OnlineUninitialized,
    /// The last go-online attempt failed.
    AttemptOnlineFailed,
    /// Deliberately taken offline.
    Offline,
    /// The worker loop observed an unhandled panic (§4.5 failure model).
    MainThreadFailed,
}

impl fmt::Display for UseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undefined => "UNDEFINED",
            Self::AttemptOnline => "ATTEMPT_ONLINE",
            Self::Online => "ONLINE",
            Self::OnlineUninitialized => "ONLINE_UNINITIALIZED",
            Self::AttemptOnlineFailed => "ATTEMPT_ONLINE_FAILED",
            Self::Offline => "OFFLINE",
            Self::MainThreadFailed => "MAIN_THREAD_FAILED",
        };
        f.write_str(s)
    }
}

impl UseState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(self, target: UseState) -> bool {
        use UseState::{
            AttemptOnline, AttemptOnlineFailed, MainThreadFailed, Offline, Online,
            OnlineUninitialized, Undefined,
        };

        matches!(
            (self, target),
            (Undefined, AttemptOnline)
                | (AttemptOnline, Online)
                | (AttemptOnline, OnlineUninitialized)
                | (AttemptOnline, AttemptOnlineFailed)
                | (OnlineUninitialized, Online)
                | (OnlineUninitialized, Offline)
                | (Online, Offline)
                | (AttemptOnlineFailed, AttemptOnline)
                | (AttemptOnlineFailed, Offline)
                | (Offline, AttemptOnline)
                // main-thread failure is reachable from any operational/transitional state
                | (AttemptOnline, MainThreadFailed)
                | (Online, MainThreadFailed)
                | (OnlineUninitialized, MainThreadFailed)
                | (Offline, MainThreadFailed)
                | (AttemptOnlineFailed, MainThreadFailed)
                // restart after a main-thread failure
                | (MainThreadFailed, AttemptOnline)
        )
    }

    /// True for `Online` and `OnlineUninitialized`.
    #[must_use]
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online | Self::OnlineUninitialized)
    }

    /// False only before the first go-online/go-offline action has completed.
    #[must_use]
    pub fn is_defined(self) -> bool {
        !matches!(self, Self::Undefined)
    }
}

/// The transport-connection axis of a part's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnState {
    /// No connection attempt in progress.
    #[default]
    NotConnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Connected and usable.
    Connected,
    /// The last connect attempt (or an established connection) failed.
    ConnectFailed,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::ConnectFailed => "CONNECT_FAILED",
        };
        f.write_str(s)
    }
}

impl ConnState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(self, target: ConnState) -> bool {
        use ConnState::{Connected, ConnectFailed, Connecting, NotConnected};

        matches!(
            (self, target),
            (NotConnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, ConnectFailed)
                | (Connected, NotConnected)
                | (Connected, ConnectFailed)
                | (ConnectFailed, Connecting)
                | (ConnectFailed, NotConnected)
        )
    }
}

/// Immutable snapshot of an active part's externally visible health.
///
/// Constructed exclusively by `BaseStatePublisher` (in `mb-runtime`);
/// every field transition is timestamped at publish time.
#[derive(Debug, Clone)]
pub struct BaseState {
    use_state: UseState,
    conn_state: ConnState,
    /// Name of the action currently being serviced, if any.
    action_name: Option<String>,
    /// Human-readable reason for the most recent failure or transition.
    last_reason: Option<String>,
    /// Set whenever the action queue is non-empty or the busy counter is non-zero (§4.5).
    busy: bool,
    timestamp: Instant,
}

impl BaseState {
    /// The initial snapshot of a newly created part: undefined, not connected, idle.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            use_state: UseState::Undefined,
            conn_state: ConnState::NotConnected,
            action_name: None,
            last_reason: None,
            busy: false,
            timestamp: Instant::now(),
        }
    }

    /// Build a snapshot with explicit field values, stamped with the current time.
    #[must_use]
    pub fn new(
        use_state: UseState,
        conn_state: ConnState,
        action_name: Option<String>,
        last_reason: Option<String>,
        busy: bool,
    ) -> Self {
        Self {
            use_state,
            conn_state,
            action_name,
            last_reason,
            busy,
            timestamp: Instant::now(),
        }
    }

    /// The use-state component.
    #[must_use]
    pub fn use_state(&self) -> UseState {
        self.use_state
    }

    /// The connection-state component.
    #[must_use]
    pub fn conn_state(&self) -> ConnState {
        self.conn_state
    }

    /// The action currently being serviced, if any.
    #[must_use]
    pub fn action_name(&self) -> Option<&str> {
        self.action_name.as_deref()
    }

    /// The reason recorded at the last state transition or failure.
    #[must_use]
    pub fn last_reason(&self) -> Option<&str> {
        self.last_reason.as_deref()
    }

    /// When this snapshot was published.
    #[must_use]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// `use_state` is `Online` or `OnlineUninitialized`.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.use_state.is_online()
    }

    /// The action queue is non-empty or the busy counter is non-zero.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// `conn_state` is `Connecting`.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.conn_state == ConnState::Connecting
    }

    /// `conn_state` is `Connected`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn_state == ConnState::Connected
    }

    /// `use_state` has left `Undefined`.
    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.use_state.is_defined()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_undefined_and_not_connected() {
        let s = BaseState::initial();
        assert_eq!(s.use_state(), UseState::Undefined);
        assert_eq!(s.conn_state(), ConnState::NotConnected);
        assert!(!s.is_defined());
        assert!(!s.is_online());
        assert!(!s.is_busy());
    }

    #[test]
    fn use_state_forward_progression() {
        assert!(UseState::Undefined.can_transition_to(UseState::AttemptOnline));
        assert!(UseState::AttemptOnline.can_transition_to(UseState::Online));
        assert!(UseState::Online.can_transition_to(UseState::Offline));
        assert!(UseState::Offline.can_transition_to(UseState::AttemptOnline));
    }

    #[test]
    fn use_state_rejects_skipping_attempt() {
        assert!(!UseState::Undefined.can_transition_to(UseState::Online));
    }

    #[test]
    fn use_state_failure_and_recovery() {
        assert!(UseState::AttemptOnline.can_transition_to(UseState::AttemptOnlineFailed));
        assert!(UseState::AttemptOnlineFailed.can_transition_to(UseState::AttemptOnline));
        assert!(UseState::Online.can_transition_to(UseState::MainThreadFailed));
        assert!(UseState::MainThreadFailed.can_transition_to(UseState::AttemptOnline));
    }

    #[test]
    fn conn_state_cycle() {
        assert!(ConnState::NotConnected.can_transition_to(ConnState::Connecting));
        assert!(ConnState::Connecting.can_transition_to(ConnState::Connected));
        assert!(ConnState::Connected.can_transition_to(ConnState::ConnectFailed));
        assert!(ConnState::ConnectFailed.can_transition_to(ConnState::Connecting));
        assert!(!ConnState::NotConnected.can_transition_to(ConnState::Connected));
    }

    #[test]
    fn predicates_reflect_fields() {
        let s = BaseState::new(
            UseState::Online,
            ConnState::Connected,
            Some("poll".into()),
            None,
            true,
        );
        assert!(s.is_online());
        assert!(s.is_connected());
        assert!(s.is_busy());
        assert!(s.is_defined());
        assert_eq!(s.action_name(), Some("poll"));
    }
}

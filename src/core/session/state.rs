//! Shared session state.
//!
//! Everything the event loop, the public API, and the supervisor task touch
//! concurrently lives here: atomics for hot flags, parking_lot for the rest.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::events::ClientEvent;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
        }
    }
}

/// State shared between the session handle and its supervisor task.
pub(super) struct SessionShared {
    state: AtomicU8,
    /// Suppresses auto-reconnect once an intentional disconnect begins
    pub(super) intentional_disconnect: AtomicBool,
    pub(super) muted: AtomicBool,
    /// Failed connection attempts since the last successful connect
    pub(super) failed_attempts: AtomicU32,
    /// Last inbound activity; uses the tokio clock so staleness is testable
    last_activity: Mutex<Instant>,
    /// Outbound sender for the currently open socket, if any
    pub(super) outbound: Mutex<Option<mpsc::UnboundedSender<ClientEvent>>>,
}

impl SessionShared {
    pub(super) fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            intentional_disconnect: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            failed_attempts: AtomicU32::new(0),
            last_activity: Mutex::new(Instant::now()),
            outbound: Mutex::new(None),
        }
    }

    pub(super) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(super) fn set_state(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel))
    }

    pub(super) fn touch_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub(super) fn since_activity(&self) -> std::time::Duration {
        self.last_activity.lock().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_atomic_encoding() {
        let shared = SessionShared::new();
        assert_eq!(shared.state(), ConnectionState::Disconnected);
        let previous = shared.set_state(ConnectionState::Connecting);
        assert_eq!(previous, ConnectionState::Disconnected);
        assert_eq!(shared.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_elapsed_follows_the_tokio_clock() {
        let shared = SessionShared::new();
        shared.touch_activity();
        tokio::time::advance(std::time::Duration::from_secs(31)).await;
        assert!(shared.since_activity() >= std::time::Duration::from_secs(31));
    }
}

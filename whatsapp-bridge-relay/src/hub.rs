//! Live fan-out hub
//!
//! Publish/subscribe broadcast group: every published event reaches every
//! subscribed channel connection, with no per-client filtering (single
//! shared mailbox). The hub also tracks the current connectivity state and
//! the pending pairing code so a late subscriber can be brought up to date
//! before it sees its first broadcast.
//!
//! Delivery is best-effort. A subscriber that lags past the channel
//! capacity misses events and recovers through a fresh snapshot, which the
//! channel contract already requires on reconnect.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

use crate::events::{ConnectionState, RelayEvent};

/// Default broadcast queue depth per subscriber
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
struct SessionStatus {
    state: ConnectionState,
    pairing_code: Option<String>,
}

/// Broadcast group of all connected channel clients
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<RelayEvent>,
    status: Arc<RwLock<SessionStatus>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            status: Arc::new(RwLock::new(SessionStatus {
                state: ConnectionState::Connecting,
                pairing_code: None,
            })),
        }
    }

    /// Publish to all subscribers, folding connectivity transitions into
    /// the tracked session status
    ///
    /// Publishing with no subscribers is fine; events are simply dropped.
    pub fn publish(&self, event: RelayEvent) {
        self.track(&event);
        let receivers = self.tx.send(event).unwrap_or(0);
        debug!("Broadcast event to {} subscribers", receivers);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// Current connectivity of the messaging session
    pub fn connection_state(&self) -> ConnectionState {
        self.status.read().expect("status lock poisoned").state
    }

    /// Pairing code still awaiting a scan, if any
    pub fn pending_pairing_code(&self) -> Option<String> {
        self.status
            .read()
            .expect("status lock poisoned")
            .pairing_code
            .clone()
    }

    fn track(&self, event: &RelayEvent) {
        let mut status = self.status.write().expect("status lock poisoned");
        match event {
            RelayEvent::PairingCode(code) => {
                status.state = ConnectionState::AwaitingPairing;
                status.pairing_code = Some(code.clone());
            }
            RelayEvent::Ready => {
                status.state = ConnectionState::Ready;
                status.pairing_code = None;
            }
            RelayEvent::Disconnected(_) => {
                status.state = ConnectionState::Disconnected;
                status.pairing_code = None;
            }
            RelayEvent::AuthFailure(_) => {
                status.state = ConnectionState::AuthFailed;
                status.pairing_code = None;
            }
            _ => {}
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

//! Connection tracking.
//!
//! The stack reports connections through callbacks that run on its own
//! event context. [`ConnectionMonitor`] installs callbacks that only record
//! what happened, so the main loop can process events later.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::ble::stack::RadioStack;
use crate::emitter::Emitter;
use crate::error::Result;

/// Opaque stack-assigned identifier of a link.
pub type ConnHandle = u16;

/// HCI reason: remote user terminated connection.
pub const DISCONNECT_REASON_REMOTE_USER_TERMINATED: u8 = 0x13;
/// HCI reason: connection timeout.
pub const DISCONNECT_REASON_CONNECTION_TIMEOUT: u8 = 0x08;

/// Snapshot of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionInfo {
    /// Connection handle.
    pub handle: ConnHandle,
    /// Peer device address.
    pub peer_address: [u8; 6],
    /// Negotiated ATT MTU.
    pub mtu: u16,
}

impl ConnectionInfo {
    /// Default ATT MTU before any exchange.
    pub const DEFAULT_MTU: u16 = 23;

    /// Largest notification payload for this link.
    pub fn max_notify_len(&self) -> u16 {
        self.mtu.saturating_sub(3)
    }
}

/// Connection state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// Link established.
    Connected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// What happened to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionEventKind {
    /// A client connected.
    Connected,
    /// The link closed with the given HCI reason.
    Disconnected {
        /// HCI reason code.
        reason: u8,
    },
}

/// Event for connection state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionEvent {
    /// The connection handle.
    pub handle: ConnHandle,
    /// What happened.
    pub kind: ConnectionEventKind,
    /// When the callback ran.
    pub at: DateTime<Utc>,
}

/// Records connection callbacks for later processing.
#[derive(Clone)]
pub struct ConnectionMonitor {
    states: Arc<RwLock<HashMap<ConnHandle, ConnectionState>>>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionMonitor {
    /// Create a monitor. Nothing is recorded until it is installed.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Install the monitor as the emitter's connect and disconnect callbacks,
    /// replacing any callbacks installed before.
    pub fn install<R: RadioStack>(&self, emitter: &mut Emitter<R>) -> Result<()> {
        let monitor = self.clone();
        emitter.install_connect_callback(move |handle| {
            monitor.record(handle, ConnectionEventKind::Connected);
        })?;

        let monitor = self.clone();
        emitter.install_disconnect_callback(move |handle, reason| {
            monitor.record(handle, ConnectionEventKind::Disconnected { reason });
        })?;

        info!("Connection monitor installed");
        Ok(())
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// State of a handle.
    pub fn state(&self, handle: ConnHandle) -> ConnectionState {
        self.states.read().get(&handle).copied().unwrap_or_default()
    }

    /// Handles currently connected.
    pub fn connected_handles(&self) -> Vec<ConnHandle> {
        let mut handles: Vec<_> = self
            .states
            .read()
            .iter()
            .filter(|(_, s)| s.is_connected())
            .map(|(h, _)| *h)
            .collect();
        handles.sort_unstable();
        handles
    }

    /// Check if any client is connected.
    pub fn is_any_connected(&self) -> bool {
        self.states.read().values().any(|s| s.is_connected())
    }

    fn record(&self, handle: ConnHandle, kind: ConnectionEventKind) {
        let new_state = match kind {
            ConnectionEventKind::Connected => ConnectionState::Connected,
            ConnectionEventKind::Disconnected { .. } => ConnectionState::Disconnected,
        };

        let old_state = self
            .states
            .write()
            .insert(handle, new_state)
            .unwrap_or_default();

        debug!(
            "Connection {} state changed: {} -> {}",
            handle, old_state, new_state
        );

        let _ = self.event_tx.send(ConnectionEvent {
            handle,
            kind,
            at: Utc::now(),
        });
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Disconnected), "Disconnected");
    }

    #[test]
    fn test_max_notify_len() {
        let info = ConnectionInfo {
            handle: 1,
            peer_address: [0; 6],
            mtu: ConnectionInfo::DEFAULT_MTU,
        };
        assert_eq!(info.max_notify_len(), 20);
    }

    #[test]
    fn test_record_updates_state_and_broadcasts() {
        let monitor = ConnectionMonitor::new();
        let mut rx = monitor.subscribe();

        monitor.record(3, ConnectionEventKind::Connected);
        monitor.record(1, ConnectionEventKind::Connected);
        assert_eq!(monitor.state(3), ConnectionState::Connected);
        assert_eq!(monitor.connected_handles(), vec![1, 3]);

        monitor.record(
            3,
            ConnectionEventKind::Disconnected {
                reason: DISCONNECT_REASON_REMOTE_USER_TERMINATED,
            },
        );
        assert_eq!(monitor.state(3), ConnectionState::Disconnected);
        assert!(monitor.is_any_connected());

        let first = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(first.handle, 3);
        assert_eq!(first.kind, ConnectionEventKind::Connected);

        let _ = rx.try_recv().unwrap();
        let last = rx.try_recv().unwrap();
        assert_eq!(
            last.kind,
            ConnectionEventKind::Disconnected { reason: 0x13 }
        );
    }

    #[test]
    fn test_unknown_handle_is_disconnected() {
        let monitor = ConnectionMonitor::default();
        assert_eq!(monitor.state(42), ConnectionState::Disconnected);
        assert!(!monitor.is_any_connected());
    }
}

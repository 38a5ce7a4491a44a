//! Published VPN state: connection entries and the canonical snapshot.

use serde::Serialize;

/// NetworkManager active connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Unknown,
    /// Connection is activating (e.g., waiting for credentials).
    Activating,
    /// Connection is fully activated and connected.
    Activated,
    Deactivating,
    Deactivated,
}

impl From<u32> for ConnectionState {
    fn from(value: u32) -> Self {
        match value {
            1 => ConnectionState::Activating,
            2 => ConnectionState::Activated,
            3 => ConnectionState::Deactivating,
            4 => ConnectionState::Deactivated,
            _ => ConnectionState::Unknown,
        }
    }
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Unknown => "unknown",
            ConnectionState::Activating => "activating",
            ConnectionState::Activated => "activated",
            ConnectionState::Deactivating => "deactivating",
            ConnectionState::Deactivated => "deactivated",
        }
    }
}

/// A VPN connection profile known to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VpnConnection {
    /// Human-readable connection name (the manager's `id`).
    pub name: String,
    pub state: ConnectionState,
    /// Interface of the first bound device, empty when not bound.
    pub device: String,
}

impl VpnConnection {
    pub fn new(name: impl Into<String>, state: ConnectionState, device: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state,
            device: device.into(),
        }
    }
}

/// Canonical snapshot of VPN state.
///
/// A new value is built for every publication; listeners never see one
/// mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VpnSnapshot {
    /// Whether a connection manager is bound.
    pub available: bool,
    /// VPN connections in manager order.
    pub connections: Vec<VpnConnection>,
    /// Name of the activated VPN (first in manager order).
    pub active: Option<String>,
    /// Target of the control operation in flight, if any.
    pub pending: Option<String>,
}

impl VpnSnapshot {
    /// Snapshot for an engine without a connection manager.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// First connection called `name`.
    pub fn find(&self, name: &str) -> Option<&VpnConnection> {
        self.connections.iter().find(|c| c.name == name)
    }

    /// Whether `name` is currently activated.
    pub fn is_active(&self, name: &str) -> bool {
        self.find(name)
            .is_some_and(|c| c.state == ConnectionState::Activated)
    }

    /// Whether an engine-initiated operation on `name` is in flight.
    pub fn is_connecting(&self, name: &str) -> bool {
        self.pending.as_deref() == Some(name)
    }

    /// Status line for a connection entry.
    pub fn state_text(&self, connection: &VpnConnection) -> &'static str {
        if self.is_connecting(&connection.name) {
            return "Connecting...";
        }

        match connection.state {
            ConnectionState::Activated => "Connected",
            ConnectionState::Activating => "Connecting...",
            ConnectionState::Deactivating => "Disconnecting...",
            _ => "Disconnected",
        }
    }
}

//! The connection-manager seam.
//!
//! [`ConnectionManager`] is what the engine needs from the platform network
//! service: two synchronous list accessors and listener registration that
//! hands back a [`SubscriptionToken`] for every listener it installs.

use crate::error::Result;

/// Opaque handle for one listener registration on a connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

impl SubscriptionToken {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

/// A connection profile as reported by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// Manager object path of the profile.
    pub path: String,
    /// Display name (`connection.id`), `None` if settings are unavailable.
    pub id: Option<String>,
    /// Connection type (`connection.type`), `None` if settings are unavailable.
    pub connection_type: Option<String>,
}

impl ConnectionRecord {
    pub fn new(
        path: impl Into<String>,
        id: impl Into<String>,
        connection_type: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            id: Some(id.into()),
            connection_type: Some(connection_type.into()),
        }
    }
}

/// A live activation of a connection profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConnectionRecord {
    /// Manager object path of the active connection.
    pub path: String,
    /// Path of the backing profile, if still known.
    pub connection_path: Option<String>,
    /// Type from the backing profile's settings, `None` if unavailable.
    pub connection_type: Option<String>,
    /// Raw manager state code (see [`ConnectionState`](super::ConnectionState)).
    pub state: u32,
    /// Interface names of bound devices, in manager order.
    pub devices: Vec<String>,
}

impl ActiveConnectionRecord {
    pub fn new(
        path: impl Into<String>,
        connection: &ConnectionRecord,
        state: u32,
        devices: &[&str],
    ) -> Self {
        Self {
            path: path.into(),
            connection_path: Some(connection.path.clone()),
            connection_type: connection.connection_type.clone(),
            state,
            devices: devices.iter().map(|d| d.to_string()).collect(),
        }
    }

    /// Record for an active connection that is already gone; only the path
    /// is known.
    pub fn removed(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            connection_path: None,
            connection_type: None,
            state: 0,
            devices: Vec::new(),
        }
    }
}

/// Manager-wide events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    ConnectionAdded,
    ConnectionRemoved,
    /// A profile's settings changed (e.g. it was renamed).
    ConnectionUpdated,
    ActiveConnectionAdded(ActiveConnectionRecord),
    ActiveConnectionRemoved(ActiveConnectionRecord),
}

/// Listener for [`ManagerEvent`]s.
pub type EventHandler = Box<dyn Fn(ManagerEvent)>;

/// Listener for one active connection's `state-changed` signal.
pub type StateChangedHandler = Box<dyn Fn()>;

/// Platform network-connection manager.
pub trait ConnectionManager {
    /// All connection profiles, in manager order.
    fn connections(&self) -> Result<Vec<ConnectionRecord>>;

    /// All active connections, in manager order.
    fn active_connections(&self) -> Result<Vec<ActiveConnectionRecord>>;

    /// Register a listener for manager-wide events.
    ///
    /// Implementations may deliver `ActiveConnectionAdded` for connections
    /// that are already active from inside this call, so that nothing
    /// activated since the caller's last query goes unseen.
    fn connect_events(&self, handler: EventHandler) -> SubscriptionToken;

    /// Register a listener for state changes of the active connection at
    /// `active_path`.
    fn connect_state_changed(
        &self,
        active_path: &str,
        handler: StateChangedHandler,
    ) -> SubscriptionToken;

    /// Remove a listener. Unknown tokens are ignored.
    fn disconnect(&self, token: SubscriptionToken);
}

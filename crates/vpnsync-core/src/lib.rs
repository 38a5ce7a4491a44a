//! vpnsync-core - platform-independent pieces of vpnsync.
//!
//! This crate holds the VPN state synchronization engine and everything it
//! needs that does not talk to the system directly:
//!
//! - **vpn**: snapshot model, snapshot builder, subscription registry,
//!   sync engine and controller
//! - **config**: TOML configuration with embedded defaults
//! - **callbacks**: listener lists used to publish snapshots
//! - **logging**: tracing subscriber setup
//! - **error**: shared error types
//!
//! The binary crate plugs a NetworkManager client, a process runner and a
//! desktop notifier into the traits defined in [`vpn::manager`] and
//! [`vpn::controller`].

pub mod callbacks;
pub mod config;
pub mod error;
pub mod logging;
pub mod vpn;

pub use config::{Config, ConfigLoadResult};
pub use error::{CommandFailure, Error, Result};
pub use vpn::{
    ActiveConnectionRecord, CommandRunner, ConnectionManager, ConnectionRecord, ConnectionState,
    Controller, ManagerEvent, Notifier, Outcome, SubscriptionToken, SyncEngine, ToolCommand,
    VpnConnection, VpnSnapshot, VpnTypes,
};

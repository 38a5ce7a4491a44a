//! VPN state synchronization.
//!
//! - `manager`: the connection-manager seam (records, events, tokens)
//! - `snapshot`: pure derivation of the published [`VpnSnapshot`]
//! - `registry`: per-active-connection `state-changed` subscriptions
//! - `engine`: binds to a manager, reconciles on every event, publishes
//! - `controller`: connect/disconnect/toggle through the activation tool
//!
//! Everything here runs on one thread. Manager callbacks and controller
//! continuations are dispatched one at a time by the caller's main loop, so
//! the engine keeps its state in `Cell`/`RefCell` without locking.

pub mod command;
pub mod controller;
pub mod engine;
pub mod manager;
pub mod registry;
pub mod snapshot;
pub mod state;
pub mod types;

pub use command::ToolCommand;
pub use controller::{CommandRunner, Controller, ControllerOptions, Notifier, Outcome};
pub use engine::{EnginePhase, SyncEngine};
pub use manager::{
    ActiveConnectionRecord, ConnectionManager, ConnectionRecord, EventHandler, ManagerEvent,
    StateChangedHandler, SubscriptionToken,
};
pub use registry::SubscriptionRegistry;
pub use state::{ConnectionState, VpnConnection, VpnSnapshot};
pub use types::VpnTypes;

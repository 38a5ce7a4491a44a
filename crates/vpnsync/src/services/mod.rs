//! System-facing implementations of the engine's collaborators.

pub mod network_manager;
pub mod notifications;
pub mod process;

//! Snapshot derivation.
//!
//! Pure functions over the manager's connection and active-connection lists.
//! Calling them twice on the same input yields equal output.

use super::manager::{ActiveConnectionRecord, ConnectionRecord};
use super::state::{ConnectionState, VpnConnection};
use super::types::VpnTypes;

/// Active entry bound to the profile at `connection_path`.
fn find_active<'a>(
    active: &'a [ActiveConnectionRecord],
    connection_path: &str,
) -> Option<&'a ActiveConnectionRecord> {
    active
        .iter()
        .find(|a| a.connection_path.as_deref() == Some(connection_path))
}

/// Build the VPN connection list.
///
/// Profiles that are not VPN-family, or whose settings or path are missing,
/// are skipped. A profile without an active entry is `Deactivated`.
pub fn build_connections(
    connections: &[ConnectionRecord],
    active: &[ActiveConnectionRecord],
    types: &VpnTypes,
) -> Vec<VpnConnection> {
    connections
        .iter()
        .filter(|c| !c.path.is_empty() && types.matches(c.connection_type.as_deref()))
        .filter_map(|c| {
            let name = c.id.clone()?;
            let (state, device) = match find_active(active, &c.path) {
                Some(a) => (
                    ConnectionState::from(a.state),
                    a.devices.first().cloned().unwrap_or_default(),
                ),
                None => (ConnectionState::Deactivated, String::new()),
            };
            Some(VpnConnection {
                name,
                state,
                device,
            })
        })
        .collect()
}

/// Name of the first activated connection.
pub fn active_vpn(connections: &[VpnConnection]) -> Option<String> {
    connections
        .iter()
        .find(|c| c.state == ConnectionState::Activated)
        .map(|c| c.name.clone())
}

/// Build the connection list and the active VPN in one pass over the input.
pub fn build(
    connections: &[ConnectionRecord],
    active: &[ActiveConnectionRecord],
    types: &VpnTypes,
) -> (Vec<VpnConnection>, Option<String>) {
    let list = build_connections(connections, active, types);
    let active_name = active_vpn(&list);
    (list, active_name)
}

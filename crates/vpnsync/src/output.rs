//! Snapshot rendering for the CLI.

use vpnsync_core::VpnSnapshot;

/// Human-readable snapshot: one line per VPN connection.
pub fn render_text(snapshot: &VpnSnapshot) -> String {
    if !snapshot.available {
        return "NetworkManager unavailable".to_string();
    }
    if snapshot.connections.is_empty() {
        return "No VPN connections configured".to_string();
    }

    let width = snapshot
        .connections
        .iter()
        .map(|c| c.name.chars().count())
        .max()
        .unwrap_or(0);

    snapshot
        .connections
        .iter()
        .map(|c| {
            let marker = if snapshot.active.as_deref() == Some(c.name.as_str()) {
                '*'
            } else {
                ' '
            };
            let mut line = format!(
                "{} {:<width$}  {}",
                marker,
                c.name,
                snapshot.state_text(c),
                width = width
            );
            if !c.device.is_empty() {
                line.push_str(&format!(" ({})", c.device));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Snapshot as a single JSON line.
pub fn render_json(snapshot: &VpnSnapshot) -> String {
    serde_json::to_string(snapshot).unwrap_or_else(|e| json_error(&e))
}

fn json_error(error: &dyn std::fmt::Display) -> String {
    serde_json::json!({ "error": error.to_string() }).to_string()
}

//! Desktop notifications via `org.freedesktop.Notifications`.

use std::collections::HashMap;

use gio::prelude::*;
use tracing::{debug, warn};

use vpnsync_core::Notifier;

const NOTIFICATIONS_NAME: &str = "org.freedesktop.Notifications";
const NOTIFICATIONS_PATH: &str = "/org/freedesktop/Notifications";
const NOTIFICATIONS_IFACE: &str = "org.freedesktop.Notifications";

const APP_NAME: &str = "vpnsync";
const APP_ICON: &str = "network-vpn";

/// Sends notifications to whichever daemon owns the name on the session bus.
///
/// Without a session bus (e.g. over ssh) notifications are logged and
/// dropped.
pub struct DesktopNotifier {
    connection: Option<gio::DBusConnection>,
}

impl DesktopNotifier {
    pub fn session() -> Self {
        let connection = gio::bus_get_sync(gio::BusType::Session, None::<&gio::Cancellable>)
            .map_err(|e| debug!("Notifications: no session bus: {}", e))
            .ok();
        Self { connection }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, summary: &str, body: &str) {
        let Some(connection) = self.connection.as_ref() else {
            debug!("Notifications: dropped '{}: {}'", summary, body);
            return;
        };

        // Notify(app_name, replaces_id, app_icon, summary, body, actions, hints, expire_timeout)
        let hints: HashMap<String, glib::Variant> = HashMap::new();
        let params = glib::Variant::tuple_from_iter([
            APP_NAME.to_variant(),
            0u32.to_variant(),
            APP_ICON.to_variant(),
            summary.to_variant(),
            body.to_variant(),
            Vec::<String>::new().to_variant(),
            hints.to_variant(),
            (-1i32).to_variant(),
        ]);

        if let Err(e) = connection.call_sync(
            Some(NOTIFICATIONS_NAME),
            NOTIFICATIONS_PATH,
            NOTIFICATIONS_IFACE,
            "Notify",
            Some(&params),
            None,
            gio::DBusCallFlags::NONE,
            2000,
            None::<&gio::Cancellable>,
        ) {
            warn!("Notifications: failed to send '{}': {}", body, e);
        }
    }
}

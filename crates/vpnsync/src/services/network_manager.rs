//! NetworkManager client over D-Bus.
//!
//! Implements [`ConnectionManager`] for the sync engine:
//!
//! - profiles come from `Settings.ListConnections` + `GetSettings`
//! - active connections from the `ActiveConnections` property
//! - `NewConnection`/`ConnectionRemoved`/`Updated` become connection events
//! - `ActiveConnections` property changes are diffed into added/removed events
//! - per active connection `StateChanged` signals become state-changed events
//!
//! Queries are blocking `call_sync` round trips. Profile settings are cached
//! while the settings signals are watched, so a state change only costs the
//! active-connection queries. Signal callbacks run on the thread-default main
//! context, which is the one driving the engine.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use gio::prelude::*;
use glib::Variant;
use tracing::{debug, info, trace, warn};

use vpnsync_core::vpn::{EventHandler, StateChangedHandler};
use vpnsync_core::{
    ActiveConnectionRecord, ConnectionManager, ConnectionRecord, Error, ManagerEvent, Result,
    SubscriptionToken,
};

/// NetworkManager service name.
pub const NM_SERVICE: &str = "org.freedesktop.NetworkManager";
/// NetworkManager main object path.
pub const NM_PATH: &str = "/org/freedesktop/NetworkManager";
/// NetworkManager main interface.
pub const NM_IFACE: &str = "org.freedesktop.NetworkManager";
const NM_SETTINGS_PATH: &str = "/org/freedesktop/NetworkManager/Settings";
const NM_SETTINGS_IFACE: &str = "org.freedesktop.NetworkManager.Settings";
/// Connection settings interface (per profile).
const IFACE_CONNECTION: &str = "org.freedesktop.NetworkManager.Settings.Connection";
/// Active connection interface.
const IFACE_ACTIVE: &str = "org.freedesktop.NetworkManager.Connection.Active";
const IFACE_DEVICE: &str = "org.freedesktop.NetworkManager.Device";
const IFACE_PROPS: &str = "org.freedesktop.DBus.Properties";

/// Timeout for NetworkManager queries, in milliseconds.
const CALL_TIMEOUT_MS: i32 = 5000;

/// Profile records, kept until the settings service reports a change.
#[derive(Default)]
struct ProfileCache {
    records: RefCell<Option<Vec<ConnectionRecord>>>,
}

impl ProfileCache {
    fn get_or_fetch<F>(&self, fetch: F) -> Result<Vec<ConnectionRecord>>
    where
        F: FnOnce() -> Result<Vec<ConnectionRecord>>,
    {
        if let Some(records) = self.records.borrow().as_ref() {
            return Ok(records.clone());
        }
        let records = fetch()?;
        *self.records.borrow_mut() = Some(records.clone());
        Ok(records)
    }

    fn invalidate(&self) {
        self.records.borrow_mut().take();
    }
}

/// [`ConnectionManager`] backed by the NetworkManager D-Bus API.
pub struct NetworkManagerClient {
    connection: gio::DBusConnection,
    subscriptions: RefCell<HashMap<SubscriptionToken, Vec<gio::SignalSubscription>>>,
    /// Tokens of live `connect_events` listeners; the profile cache is only
    /// trusted while one exists.
    event_tokens: RefCell<HashSet<SubscriptionToken>>,
    profiles: Rc<ProfileCache>,
    next_token: Cell<u64>,
}

impl NetworkManagerClient {
    pub fn new(connection: gio::DBusConnection) -> Rc<Self> {
        Rc::new(Self {
            connection,
            subscriptions: RefCell::new(HashMap::new()),
            event_tokens: RefCell::new(HashSet::new()),
            profiles: Rc::new(ProfileCache::default()),
            next_token: Cell::new(1),
        })
    }

    /// Client on `connection` if NetworkManager is running there, `None`
    /// otherwise.
    pub fn on_bus(connection: &gio::DBusConnection) -> Option<Rc<Self>> {
        if !has_owner(connection) {
            debug!("VPN: {} is not running", NM_SERVICE);
            return None;
        }
        Some(Self::new(connection.clone()))
    }

    fn store(&self, subscriptions: Vec<gio::SignalSubscription>) -> SubscriptionToken {
        let token = SubscriptionToken::new(self.next_token.get());
        self.next_token.set(token.id() + 1);
        self.subscriptions.borrow_mut().insert(token, subscriptions);
        token
    }

    fn subscribe<F>(
        &self,
        interface: &str,
        member: &str,
        path: Option<&str>,
        callback: F,
    ) -> gio::SignalSubscription
    where
        F: Fn(&Variant) + 'static,
    {
        self.connection.subscribe_to_signal(
            Some(NM_SERVICE),
            Some(interface),
            Some(member),
            path,
            None,
            gio::DBusSignalFlags::NONE,
            move |signal| callback(&signal.parameters),
        )
    }
}

impl ConnectionManager for NetworkManagerClient {
    fn connections(&self) -> Result<Vec<ConnectionRecord>> {
        if self.event_tokens.borrow().is_empty() {
            return list_connections(&self.connection);
        }
        self.profiles.get_or_fetch(|| list_connections(&self.connection))
    }

    fn active_connections(&self) -> Result<Vec<ActiveConnectionRecord>> {
        Ok(active_paths(&self.connection)?
            .into_iter()
            .map(|path| active_record(&self.connection, path))
            .collect())
    }

    fn connect_events(&self, handler: EventHandler) -> SubscriptionToken {
        let handler: Rc<dyn Fn(ManagerEvent)> = Rc::from(handler);

        // Profile changes drop the cache before the engine reconciles
        let settings_event = |event: ManagerEvent| {
            let handler = handler.clone();
            let profiles = self.profiles.clone();
            move |_: &Variant| {
                profiles.invalidate();
                handler(event.clone());
            }
        };
        let added = self.subscribe(
            NM_SETTINGS_IFACE,
            "NewConnection",
            Some(NM_SETTINGS_PATH),
            settings_event(ManagerEvent::ConnectionAdded),
        );
        let removed = self.subscribe(
            NM_SETTINGS_IFACE,
            "ConnectionRemoved",
            Some(NM_SETTINGS_PATH),
            settings_event(ManagerEvent::ConnectionRemoved),
        );
        // Updated is emitted on the profile object itself
        let updated = self.subscribe(
            IFACE_CONNECTION,
            "Updated",
            None,
            settings_event(ManagerEvent::ConnectionUpdated),
        );

        // NetworkManager has no dedicated signals for active connections;
        // diff the ActiveConnections property against the last value seen.
        // Subscribe before reading the baseline so no change falls between.
        let known: Rc<RefCell<Vec<String>>> = Rc::default();
        let on_active = {
            let known = known.clone();
            let handler = handler.clone();
            let connection = self.connection.clone();
            move |params: &Variant| {
                if params.child_value(0).str() != Some(NM_IFACE) {
                    return;
                }
                let Some(value) = params.child_value(1).lookup_value("ActiveConnections", None)
                else {
                    return;
                };
                let current = object_paths(&value);
                let previous = known.replace(current.clone());
                emit_active_changes(handler.as_ref(), &previous, &current, |path| {
                    active_record(&connection, path)
                });
            }
        };
        let active = self.subscribe(IFACE_PROPS, "PropertiesChanged", Some(NM_PATH), on_active);

        self.profiles.invalidate();
        let token = self.store(vec![added, removed, updated, active]);
        self.event_tokens.borrow_mut().insert(token);

        // Catch up: anything active now may have appeared after the caller's
        // own query. Replaying it is harmless for already monitored paths.
        match active_paths(&self.connection) {
            Ok(current) => {
                let previous = known.replace(current.clone());
                emit_active_changes(handler.as_ref(), &previous, &current, |path| {
                    active_record(&self.connection, path)
                });
            }
            Err(e) => warn!("VPN: failed to read active connections: {}", e),
        }

        token
    }

    fn connect_state_changed(
        &self,
        active_path: &str,
        handler: StateChangedHandler,
    ) -> SubscriptionToken {
        // Subscribe to StateChanged on this active connection only
        let subscription =
            self.subscribe(IFACE_ACTIVE, "StateChanged", Some(active_path), move |_| handler());
        self.store(vec![subscription])
    }

    fn disconnect(&self, token: SubscriptionToken) {
        {
            let mut event_tokens = self.event_tokens.borrow_mut();
            if event_tokens.remove(&token) && event_tokens.is_empty() {
                self.profiles.invalidate();
            }
        }
        let Some(subscriptions) = self.subscriptions.borrow_mut().remove(&token) else {
            return;
        };
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }
}

impl Drop for NetworkManagerClient {
    fn drop(&mut self) {
        for (_, subscriptions) in self.subscriptions.get_mut().drain() {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        }
    }
}

/// Follow NetworkManager appearing and disappearing on `connection`.
///
/// `on_change` receives a fresh client whenever the service gains an owner
/// (first start or restart) and `None` when it loses it. Dropping the
/// returned proxy stops the watch.
pub fn watch_service<F>(connection: &gio::DBusConnection, on_change: F) -> Option<gio::DBusProxy>
where
    F: Fn(Option<Rc<NetworkManagerClient>>) + 'static,
{
    let proxy = match gio::DBusProxy::new_sync(
        connection,
        gio::DBusProxyFlags::DO_NOT_LOAD_PROPERTIES
            | gio::DBusProxyFlags::DO_NOT_CONNECT_SIGNALS
            | gio::DBusProxyFlags::DO_NOT_AUTO_START,
        None::<&gio::DBusInterfaceInfo>,
        Some(NM_SERVICE),
        NM_PATH,
        NM_IFACE,
        None::<&gio::Cancellable>,
    ) {
        Ok(p) => p,
        Err(e) => {
            warn!("VPN: failed to create NetworkManager proxy: {}", e);
            return None;
        }
    };

    let connection = connection.clone();
    proxy.connect_local("notify::g-name-owner", false, move |values| {
        let proxy = values[0].get::<gio::DBusProxy>().ok()?;
        if proxy.name_owner().is_some() {
            info!("VPN: {} appeared", NM_SERVICE);
            on_change(Some(NetworkManagerClient::new(connection.clone())));
        } else {
            warn!("VPN: {} disappeared", NM_SERVICE);
            on_change(None);
        }
        None
    });

    Some(proxy)
}

/// Whether NetworkManager currently owns its bus name.
fn has_owner(connection: &gio::DBusConnection) -> bool {
    connection
        .call_sync(
            Some("org.freedesktop.DBus"),
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
            "NameHasOwner",
            Some(&(NM_SERVICE,).to_variant()),
            None,
            gio::DBusCallFlags::NONE,
            CALL_TIMEOUT_MS,
            None::<&gio::Cancellable>,
        )
        .ok()
        .and_then(|reply| reply.child_value(0).get::<bool>())
        .unwrap_or(false)
}

fn call(
    connection: &gio::DBusConnection,
    path: &str,
    interface: &str,
    method: &str,
    args: Option<&Variant>,
) -> Result<Variant> {
    connection
        .call_sync(
            Some(NM_SERVICE),
            path,
            interface,
            method,
            args,
            None,
            gio::DBusCallFlags::NONE,
            CALL_TIMEOUT_MS,
            None::<&gio::Cancellable>,
        )
        .map_err(|e| Error::Manager(format!("{}.{} on {}: {}", interface, method, path, e)))
}

/// Fetch one property, unwrapped from its `v` container.
fn property(
    connection: &gio::DBusConnection,
    path: &str,
    interface: &str,
    name: &str,
) -> Result<Variant> {
    let reply = call(
        connection,
        path,
        IFACE_PROPS,
        "Get",
        Some(&(interface, name).to_variant()),
    )?;
    Ok(reply.child_value(0).child_value(0))
}

/// Fetch all properties of `interface` as an `a{sv}` dictionary.
fn properties(connection: &gio::DBusConnection, path: &str, interface: &str) -> Result<Variant> {
    let reply = call(
        connection,
        path,
        IFACE_PROPS,
        "GetAll",
        Some(&(interface,).to_variant()),
    )?;
    Ok(reply.child_value(0))
}

fn list_connections(connection: &gio::DBusConnection) -> Result<Vec<ConnectionRecord>> {
    let reply = call(
        connection,
        NM_SETTINGS_PATH,
        NM_SETTINGS_IFACE,
        "ListConnections",
        None,
    )?;

    Ok(object_paths(&reply.child_value(0))
        .into_iter()
        .map(|path| connection_record(connection, path))
        .collect())
}

fn active_paths(connection: &gio::DBusConnection) -> Result<Vec<String>> {
    let value = property(connection, NM_PATH, NM_IFACE, "ActiveConnections")?;
    Ok(object_paths(&value))
}

/// Split a change of the `ActiveConnections` list into `(removed, added)`,
/// each in list order.
fn diff_active(previous: &[String], current: &[String]) -> (Vec<String>, Vec<String>) {
    let removed = previous
        .iter()
        .filter(|p| !current.contains(p))
        .cloned()
        .collect();
    let added = current
        .iter()
        .filter(|p| !previous.contains(p))
        .cloned()
        .collect();
    (removed, added)
}

/// Removals go out before additions, so a path that is reused is released
/// before it is subscribed again.
fn emit_active_changes<F>(
    handler: &dyn Fn(ManagerEvent),
    previous: &[String],
    current: &[String],
    lookup: F,
) where
    F: Fn(String) -> ActiveConnectionRecord,
{
    let (removed, added) = diff_active(previous, current);
    for path in removed {
        trace!("VPN: active connection removed: {}", path);
        handler(ManagerEvent::ActiveConnectionRemoved(
            ActiveConnectionRecord::removed(path),
        ));
    }
    for path in added {
        trace!("VPN: active connection added: {}", path);
        handler(ManagerEvent::ActiveConnectionAdded(lookup(path)));
    }
}

/// Object paths from an `ao` value; `/` means "none" and is dropped.
fn object_paths(value: &Variant) -> Vec<String> {
    (0..value.n_children())
        .filter_map(|i| value.child_value(i).str().map(str::to_string))
        .filter(|p| p != "/")
        .collect()
}

/// String entry of an `a{sv}` dictionary.
fn dict_string(dict: &Variant, key: &str) -> Option<String> {
    dict.lookup_value(key, None)?.str().map(str::to_string)
}

/// Profile at `path`. Unreadable settings leave `id` and `type` unset.
fn connection_record(connection: &gio::DBusConnection, path: String) -> ConnectionRecord {
    let section = match call(connection, &path, IFACE_CONNECTION, "GetSettings", None) {
        Ok(reply) => reply.child_value(0).lookup_value("connection", None),
        Err(e) => {
            debug!("VPN: {}", e);
            None
        }
    };

    ConnectionRecord {
        id: section.as_ref().and_then(|s| dict_string(s, "id")),
        connection_type: section.as_ref().and_then(|s| dict_string(s, "type")),
        path,
    }
}

/// Active connection at `path`. Properties that cannot be read are left empty.
fn active_record(connection: &gio::DBusConnection, path: String) -> ActiveConnectionRecord {
    let props = match properties(connection, &path, IFACE_ACTIVE) {
        Ok(props) => props,
        Err(e) => {
            debug!("VPN: {}", e);
            return ActiveConnectionRecord::removed(path);
        }
    };

    let devices = props
        .lookup_value("Devices", None)
        .map(|v| object_paths(&v))
        .unwrap_or_default()
        .iter()
        .filter_map(|device| {
            property(connection, device, IFACE_DEVICE, "Interface")
                .ok()
                .and_then(|v| v.str().map(str::to_string))
        })
        .collect();

    ActiveConnectionRecord {
        connection_path: props
            .lookup_value("Connection", None)
            .and_then(|v| v.str().map(str::to_string))
            .filter(|p| p != "/"),
        connection_type: dict_string(&props, "Type"),
        state: props
            .lookup_value("State", None)
            .and_then(|v| v.get::<u32>())
            .unwrap_or(0),
        devices,
        path,
    }
}

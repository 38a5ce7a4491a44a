//! SyncEngine - keeps the published VPN snapshot in step with the manager.
//!
//! ## Lifecycle
//!
//! `Unbound → Bound → Subscribed → TornDown`
//!
//! - `bind(None)` leaves the engine inert with an unavailable snapshot.
//! - `bind(Some(manager))` reconciles once, monitors every pre-existing active
//!   connection, then listens for manager events.
//! - `on_manager_replaced` releases everything held on the old manager before
//!   binding the new one.
//!
//! Every event ends in a full rebuild of the snapshot, which is published
//! even when it equals the previous one.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, error, trace, warn};

use super::manager::{ConnectionManager, ManagerEvent, SubscriptionToken};
use super::registry::SubscriptionRegistry;
use super::snapshot;
use super::state::VpnSnapshot;
use super::types::VpnTypes;
use crate::callbacks::{CallbackId, Callbacks};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// No manager (never bound, or bound to an unavailable one).
    Unbound,
    /// Manager acquired, initial monitoring not finished.
    Bound,
    /// Listening for manager events.
    Subscribed,
    /// Released the previous manager.
    TornDown,
}

/// VPN state synchronization engine.
pub struct SyncEngine {
    types: VpnTypes,
    manager: RefCell<Option<Rc<dyn ConnectionManager>>>,
    /// Token of the manager-wide event listener.
    events_token: Cell<Option<SubscriptionToken>>,
    registry: RefCell<SubscriptionRegistry>,
    snapshot: RefCell<VpnSnapshot>,
    callbacks: Callbacks<VpnSnapshot>,
    phase: Cell<EnginePhase>,
    weak_self: Weak<SyncEngine>,
}

impl SyncEngine {
    /// Create an unbound engine recognizing `types` as VPN-family.
    pub fn new(types: VpnTypes) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            registry: RefCell::new(SubscriptionRegistry::new(types.clone())),
            types,
            manager: RefCell::new(None),
            events_token: Cell::new(None),
            snapshot: RefCell::new(VpnSnapshot::unavailable()),
            callbacks: Callbacks::new(),
            phase: Cell::new(EnginePhase::Unbound),
            weak_self: weak_self.clone(),
        })
    }

    /// Register a listener for published snapshots. The current snapshot is
    /// delivered immediately.
    pub fn subscribe<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&VpnSnapshot) + 'static,
    {
        let snapshot = self.snapshot();
        callback(&snapshot);
        self.callbacks.register(callback)
    }

    pub fn unsubscribe(&self, id: CallbackId) -> bool {
        self.callbacks.unregister(id)
    }

    /// Return the current VPN snapshot.
    pub fn snapshot(&self) -> VpnSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase.get()
    }

    pub fn types(&self) -> &VpnTypes {
        &self.types
    }

    /// Whether a `state-changed` listener is installed for `active_path`.
    pub fn is_monitoring(&self, active_path: &str) -> bool {
        self.registry.borrow().is_subscribed(active_path)
    }

    /// Number of active connections being monitored.
    pub fn monitored_count(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Bind to `manager`. `None` means the manager is unavailable: the engine
    /// logs it and stays inert until the next bind.
    pub fn bind(&self, manager: Option<Rc<dyn ConnectionManager>>) {
        // Drop whatever the previous manager left behind
        self.release_manager();

        let Some(manager) = manager else {
            error!("VPN: connection manager not available");
            self.phase.set(EnginePhase::Unbound);
            let pending = self.pending();
            self.publish(VpnSnapshot {
                pending,
                ..VpnSnapshot::unavailable()
            });
            return;
        };

        *self.manager.borrow_mut() = Some(manager.clone());
        self.phase.set(EnginePhase::Bound);

        // Existing sessions must be monitored before events are handled.
        self.reconcile();
        self.monitor_existing(manager.as_ref());

        // Listen for manager-wide events. The handler may already run here.
        let weak = self.weak_self.clone();
        let token = manager.connect_events(Box::new(move |event| {
            if let Some(engine) = weak.upgrade() {
                engine.handle_event(event);
            }
        }));
        self.events_token.set(Some(token));
        self.phase.set(EnginePhase::Subscribed);
        debug!("VPN: engine bound ({} monitored)", self.monitored_count());
    }

    /// The manager instance changed (e.g. NetworkManager restarted). Drops
    /// every subscription on the old instance and binds to `manager`.
    pub fn on_manager_replaced(&self, manager: Option<Rc<dyn ConnectionManager>>) {
        debug!("VPN: connection manager replaced");
        self.release_manager();
        self.bind(manager);
    }

    /// Release the manager and all subscriptions.
    pub fn teardown(&self) {
        self.release_manager();
    }

    /// Rebuild the snapshot from the manager and publish it.
    ///
    /// Query failures are logged and leave the previous snapshot in place.
    pub fn reconcile(&self) {
        if let Err(e) = self.try_reconcile() {
            warn!("VPN: failed to refresh connections: {}", e);
        }
    }

    fn try_reconcile(&self) -> Result<()> {
        let manager = self.manager.borrow().clone();
        let pending = self.pending();

        let Some(manager) = manager else {
            trace!("VPN: reconcile without manager");
            self.publish(VpnSnapshot {
                pending,
                ..VpnSnapshot::unavailable()
            });
            return Ok(());
        };

        // Any failure here keeps the last published snapshot
        let connections = manager.connections()?;
        let active = manager.active_connections()?;
        let (connections, active) = snapshot::build(&connections, &active, &self.types);

        self.publish(VpnSnapshot {
            available: true,
            connections,
            active,
            pending,
        });
        Ok(())
    }

    pub(crate) fn pending(&self) -> Option<String> {
        self.snapshot.borrow().pending.clone()
    }

    /// Mark `name` as the operation in flight and publish.
    pub(crate) fn set_pending(&self, name: &str) {
        let snapshot = VpnSnapshot {
            pending: Some(name.to_string()),
            ..self.snapshot()
        };
        self.publish(snapshot);
    }

    /// Clear the in-flight marker and publish.
    pub(crate) fn clear_pending(&self) {
        let snapshot = VpnSnapshot {
            pending: None,
            ..self.snapshot()
        };
        self.publish(snapshot);
    }

    fn publish(&self, snapshot: VpnSnapshot) {
        *self.snapshot.borrow_mut() = snapshot.clone();
        self.callbacks.notify(&snapshot);
    }

    fn monitor_existing(&self, manager: &dyn ConnectionManager) {
        match manager.active_connections() {
            Ok(active) => {
                // Subscribe to StateChanged on every connection already up
                let mut registry = self.registry.borrow_mut();
                for conn in &active {
                    registry.ensure_subscribed(manager, conn, || self.state_changed_handler());
                }
            }
            Err(e) => warn!("VPN: failed to list active connections: {}", e),
        }
    }

    fn state_changed_handler(&self) -> Box<dyn Fn()> {
        let weak = self.weak_self.clone();
        Box::new(move || {
            if let Some(engine) = weak.upgrade() {
                trace!("VPN: active connection state changed");
                engine.reconcile();
            }
        })
    }

    fn handle_event(&self, event: ManagerEvent) {
        let Some(manager) = self.manager.borrow().clone() else {
            return;
        };

        trace!("VPN: manager event {:?}", event);
        match event {
            ManagerEvent::ConnectionAdded
            | ManagerEvent::ConnectionRemoved
            | ManagerEvent::ConnectionUpdated => {}
            ManagerEvent::ActiveConnectionAdded(active) => {
                self.registry.borrow_mut().ensure_subscribed(
                    manager.as_ref(),
                    &active,
                    || self.state_changed_handler(),
                );
            }
            ManagerEvent::ActiveConnectionRemoved(active) => {
                self.registry
                    .borrow_mut()
                    .release(manager.as_ref(), &active.path);
            }
        }
        self.reconcile();
    }

    fn release_manager(&self) {
        let Some(manager) = self.manager.borrow_mut().take() else {
            return;
        };

        // Global listener first, then the per-connection ones
        if let Some(token) = self.events_token.take() {
            manager.disconnect(token);
        }
        self.registry.borrow_mut().release_all(manager.as_ref());
        self.phase.set(EnginePhase::TornDown);
        debug!("VPN: released connection manager");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.release_manager();
    }
}

//! Per-active-connection `state-changed` subscriptions.
//!
//! The registry maps an active connection's object path to the token of its
//! listener. A path has a token exactly while the engine watches it, and a
//! path is never registered twice.

use std::collections::HashMap;

use tracing::{debug, trace};

use super::manager::{
    ActiveConnectionRecord, ConnectionManager, StateChangedHandler, SubscriptionToken,
};
use super::types::VpnTypes;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    types: VpnTypes,
    tokens: HashMap<String, SubscriptionToken>,
}

impl SubscriptionRegistry {
    pub fn new(types: VpnTypes) -> Self {
        Self {
            types,
            tokens: HashMap::new(),
        }
    }

    /// Watch `active` for state changes if it is a VPN and not yet watched.
    ///
    /// `make_handler` is only called when a listener is actually installed.
    /// Active connections whose backing settings are unavailable count as
    /// non-VPN. Returns whether a new subscription was installed.
    pub fn ensure_subscribed<F>(
        &mut self,
        manager: &dyn ConnectionManager,
        active: &ActiveConnectionRecord,
        make_handler: F,
    ) -> bool
    where
        F: FnOnce() -> StateChangedHandler,
    {
        if self.tokens.contains_key(&active.path) {
            trace!("VPN: {} already monitored", active.path);
            return false;
        }

        if !self.types.matches(active.connection_type.as_deref()) {
            trace!(
                "VPN: not monitoring {} (type {:?})",
                active.path, active.connection_type
            );
            return false;
        }

        let token = manager.connect_state_changed(&active.path, make_handler());
        debug!("VPN: monitoring state of {}", active.path);
        self.tokens.insert(active.path.clone(), token);
        true
    }

    /// Stop watching `path`. Returns `false` if it was not watched.
    pub fn release(&mut self, manager: &dyn ConnectionManager, path: &str) -> bool {
        match self.tokens.remove(path) {
            Some(token) => {
                manager.disconnect(token);
                debug!("VPN: stopped monitoring {}", path);
                true
            }
            None => false,
        }
    }

    /// Stop watching everything.
    pub fn release_all(&mut self, manager: &dyn ConnectionManager) {
        for (path, token) in self.tokens.drain() {
            manager.disconnect(token);
            trace!("VPN: stopped monitoring {}", path);
        }
    }

    pub fn is_subscribed(&self, path: &str) -> bool {
        self.tokens.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

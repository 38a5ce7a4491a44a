//! Listener lists for snapshot publication.
//!
//! Listeners are invoked in registration order. The list is copied before
//! dispatch so a listener may register or remove listeners (or read the
//! publishing service) while it runs.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Identifier returned by [`Callbacks::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type Callback<T> = Rc<dyn Fn(&T)>;

/// A list of `Fn(&T)` listeners.
pub struct Callbacks<T> {
    entries: RefCell<Vec<(CallbackId, Callback<T>)>>,
    next_id: Cell<u64>,
}

impl<T> Callbacks<T> {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    /// Add a listener.
    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&T) + 'static,
    {
        let id = CallbackId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.entries.borrow_mut().push((id, Rc::new(callback)));
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unregister(&self, id: CallbackId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Invoke every listener with `value`.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .entries
            .borrow()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in callbacks {
            cb(value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self::new()
    }
}

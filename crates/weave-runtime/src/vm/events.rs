#![forbid(unsafe_code)]

//! Component events.
//!
//! `emit` runs the listeners of one view-model, `dispatch` bubbles towards
//! the root and `broadcast` descends into the subtree. Both propagations stop
//! as soon as a listener calls [`Evt::stop`]. Scope view-models do not keep
//! listeners: registering or emitting on a scope acts on its component.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;
use weave_reactive::Value;

use super::Vm;

pub(crate) type EventCallback = Rc<dyn Fn(&Vm, &Evt)>;

/// Handle returned by [`Vm::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) struct Listener {
    id: ListenerId,
    callback: EventCallback,
}

/// An event travelling through view-models.
pub struct Evt {
    kind: Rc<str>,
    detail: Value,
    stopped: Cell<bool>,
}

impl Evt {
    #[must_use]
    pub fn new(kind: &str, detail: Value) -> Self {
        Self {
            kind: kind.into(),
            detail,
            stopped: Cell::new(false),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn detail(&self) -> &Value {
        &self.detail
    }

    /// Stop `dispatch`/`broadcast` propagation.
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }
}

impl fmt::Debug for Evt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evt")
            .field("kind", &self.kind)
            .field("detail", &self.detail)
            .field("stopped", &self.stopped.get())
            .finish()
    }
}

impl Vm {
    /// Register a listener for `event`.
    pub fn on(&self, event: &str, callback: impl Fn(&Vm, &Evt) + 'static) -> ListenerId {
        self.listen(event, Rc::new(callback))
    }

    pub(crate) fn listen(&self, event: &str, callback: EventCallback) -> ListenerId {
        let host = self.host();
        let id = ListenerId(host.inner.next_listener.get());
        host.inner.next_listener.set(id.0 + 1);
        host.inner
            .listeners
            .borrow_mut()
            .entry(event.into())
            .or_default()
            .push(Listener { id, callback });
        id
    }

    /// Remove one listener, or every listener of `event` when `id` is `None`.
    pub fn off(&self, event: &str, id: Option<ListenerId>) {
        let host = self.host();
        let mut listeners = host.inner.listeners.borrow_mut();
        match id {
            None => {
                listeners.remove(event);
            }
            Some(id) => {
                if let Some(list) = listeners.get_mut(event) {
                    list.retain(|l| l.id != id);
                    if list.is_empty() {
                        listeners.remove(event);
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.host()
            .inner
            .listeners
            .borrow()
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Run the listeners of `event` on this view-model only.
    pub fn emit(&self, event: &str, detail: Value) -> Evt {
        let evt = Evt::new(event, detail);
        self.emit_evt(&evt);
        evt
    }

    pub(crate) fn emit_evt(&self, evt: &Evt) {
        let host = self.host();
        let callbacks: Vec<EventCallback> = host
            .inner
            .listeners
            .borrow()
            .get(evt.kind())
            .map(|list| list.iter().map(|l| l.callback.clone()).collect())
            .unwrap_or_default();
        trace!(vm = %host.id(), event = evt.kind(), listeners = callbacks.len(), "emit");
        for callback in callbacks {
            callback(&host, evt);
        }
    }

    /// Emit here, then on each ancestor component until stopped.
    pub fn dispatch(&self, event: &str, detail: Value) -> Evt {
        let evt = Evt::new(event, detail);
        let mut current = Some(self.host());
        while let Some(vm) = current {
            vm.emit_evt(&evt);
            if evt.is_stopped() {
                break;
            }
            current = vm.parent().map(|p| p.host());
        }
        evt
    }

    /// Emit here, then on every descendant component, depth first, until
    /// stopped.
    pub fn broadcast(&self, event: &str, detail: Value) -> Evt {
        let evt = Evt::new(event, detail);
        let host = self.host();
        host.emit_evt(&evt);
        if !evt.is_stopped() {
            host.broadcast_children(&evt);
        }
        evt
    }

    fn broadcast_children(&self, evt: &Evt) {
        for child in self.children() {
            if evt.is_stopped() {
                return;
            }
            if !child.is_scope() {
                child.emit_evt(evt);
                if evt.is_stopped() {
                    return;
                }
            }
            child.broadcast_children(evt);
        }
    }

    pub(crate) fn clear_listeners(&self) {
        self.inner.listeners.borrow_mut().clear();
    }
}

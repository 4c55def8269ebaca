#![forbid(unsafe_code)]

//! The instance surface.
//!
//! An [`App`] owns one document, one differ, the turn queue driving it, the
//! component registry and the arena of live view-models. Hosts talk to it
//! through a handful of calls:
//!
//! | Call | Effect | Finish marker |
//! |---|---|---|
//! | [`bootstrap`](App::bootstrap) | build the root view-model into the document | `createFinish` |
//! | [`refresh`](App::refresh) | write root data keys | `refreshFinish` |
//! | [`fire_event`](App::fire_event) | run a bound element handler | `updateFinish` |
//! | [`tick`](App::tick) | run the queued turn (the differ's timer) | none |
//!
//! Each call flushes what it scheduled and hands the resulting mutations to
//! the [`RenderBackend`] as one batch.
//!
//! # Invariants
//!
//! 1. Every live view-model is reachable from the arena by its id, and
//!    nothing else holds it strongly.
//! 2. Ids handed out by [`AppInner::next_id`] are unique for the instance
//!    (view-models, blocks and watch keys share the counter).
//! 3. Nothing is delivered to the backend after `destroy`.
//!
//! # Failure Modes
//!
//! - **Calls after destroy**: return [`RuntimeError::InstanceDestroyed`].
//! - **Event on a removed node**: [`RuntimeError::StaleNode`].

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, info};
use weave_dom::{Document, Mutation, NodeId, RenderBackend};
use weave_reactive::Value;

use crate::compiler::Dest;
use crate::component::ComponentDef;
use crate::config::RuntimeConfig;
use crate::differ::Differ;
use crate::error::{Result, RuntimeError};
use crate::turn::TurnQueue;
use crate::vm::{ComponentSpawn, Vm, VmId, create_component};

pub(crate) struct AppInner {
    pub(crate) id: String,
    pub(crate) config: RuntimeConfig,
    pub(crate) doc: RefCell<Document>,
    pub(crate) differ: Differ,
    pub(crate) turns: TurnQueue,
    components: RefCell<FxHashMap<Rc<str>, Rc<ComponentDef>>>,
    vms: RefCell<FxHashMap<VmId, Vm>>,
    root: Cell<Option<VmId>>,
    backend: Box<dyn RenderBackend>,
    destroyed: Cell<bool>,
    next_id: Cell<u64>,
}

impl AppInner {
    pub(crate) fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    pub(crate) fn vm(&self, id: VmId) -> Option<Vm> {
        self.vms.borrow().get(&id).cloned()
    }

    pub(crate) fn insert_vm(&self, vm: Vm) {
        self.vms.borrow_mut().insert(vm.id(), vm);
    }

    pub(crate) fn remove_vm(&self, id: VmId) {
        // Release the borrow before the handle drops.
        let removed = self.vms.borrow_mut().remove(&id);
        drop(removed);
    }

    pub(crate) fn component(&self, name: &str) -> Option<Rc<ComponentDef>> {
        self.components.borrow().get(name).cloned()
    }
}

/// One running instance. Clones share the instance.
#[derive(Clone)]
pub struct App {
    pub(crate) inner: Rc<AppInner>,
}

impl App {
    pub(crate) fn from_inner(inner: Rc<AppInner>) -> Self {
        Self { inner }
    }

    pub fn new(
        id: impl Into<String>,
        config: RuntimeConfig,
        backend: impl RenderBackend + 'static,
    ) -> Self {
        let id = id.into();
        let turns = TurnQueue::new();
        let differ = Differ::new(
            Rc::new(turns.clone()),
            config.max_flush_passes,
            config.trace_flush,
        );
        Self {
            inner: Rc::new(AppInner {
                doc: RefCell::new(Document::new(id.clone())),
                id,
                config,
                differ,
                turns,
                components: RefCell::new(FxHashMap::default()),
                vms: RefCell::new(FxHashMap::default()),
                root: Cell::new(None),
                backend: Box::new(backend),
                destroyed: Cell::new(false),
                next_id: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn differ(&self) -> &Differ {
        &self.inner.differ
    }

    /// Queue the differ schedules its flushes on.
    #[must_use]
    pub fn turns(&self) -> &TurnQueue {
        &self.inner.turns
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(RuntimeError::InstanceDestroyed);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Make `def` available as a node type. A later registration under the
    /// same name replaces the earlier one.
    pub fn register_component(&self, def: Rc<ComponentDef>) {
        let name: Rc<str> = def.name().into();
        self.inner.components.borrow_mut().insert(name, def);
    }

    #[must_use]
    pub fn has_component(&self, name: &str) -> bool {
        self.inner.components.borrow().contains_key(name)
    }

    // -----------------------------------------------------------------------
    // Host calls
    // -----------------------------------------------------------------------

    /// Create the root view-model of component `name` into the document.
    /// `data` overrides keys of the component's initial data.
    pub fn bootstrap(&self, name: &str, data: Option<serde_json::Value>) -> Result<Vm> {
        self.ensure_alive()?;
        if self.inner.root.get().is_some() {
            return Err(RuntimeError::AlreadyBootstrapped);
        }
        let def = self
            .inner
            .component(name)
            .ok_or_else(|| RuntimeError::UnknownComponent(name.to_string()))?;

        info!(instance = %self.inner.id, component = name, "app.bootstrap");
        let root = self.inner.doc.borrow().root();
        let vm = create_component(
            self,
            ComponentSpawn {
                def,
                parent: None,
                node: None,
                repeat_item: None,
                data,
            },
            &Dest::Element(root),
        );
        self.inner.root.set(Some(vm.id()));
        self.finish(Mutation::CreateFinish);
        Ok(vm)
    }

    /// Write every key of `data` into the root view-model.
    pub fn refresh(&self, data: serde_json::Value) -> Result<()> {
        self.ensure_alive()?;
        let root = self.root_vm().ok_or(RuntimeError::NotBootstrapped)?;
        if let serde_json::Value::Object(entries) = data {
            for (key, value) in entries {
                root.set(&key, Value::from_json(value));
            }
        }
        self.finish(Mutation::RefreshFinish);
        Ok(())
    }

    /// Run the `event` handler bound on `node` with `payload`.
    pub fn fire_event(&self, node: NodeId, event: &str, payload: serde_json::Value) -> Result<()> {
        self.ensure_alive()?;
        let handler = {
            let doc = self.inner.doc.borrow();
            if !doc.is_alive(node) {
                return Err(RuntimeError::StaleNode(node));
            }
            doc.event_handler(node, event)
        };
        let handler = handler.ok_or_else(|| RuntimeError::NoHandler {
            node,
            event: event.to_string(),
        })?;
        debug!(instance = %self.inner.id, node = ?node, event, "app.fire_event");
        handler(&payload);
        self.finish(Mutation::UpdateFinish);
        Ok(())
    }

    /// [`fire_event`](Self::fire_event) addressed by the backend reference
    /// number of the node.
    pub fn fire_event_by_ref(
        &self,
        node_ref: u64,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.ensure_alive()?;
        let node = self
            .inner
            .doc
            .borrow()
            .find_by_ref(node_ref)
            .ok_or(RuntimeError::UnknownRef(node_ref))?;
        self.fire_event(node, event, payload)
    }

    /// Run the queued turn and deliver what it produced. Returns the number
    /// of tasks run.
    pub fn tick(&self) -> usize {
        if self.is_destroyed() {
            return 0;
        }
        let ran = self.inner.turns.run_pending();
        self.deliver();
        ran
    }

    /// Flush the differ now and deliver the result.
    pub fn flush(&self) {
        if self.is_destroyed() {
            return;
        }
        self.inner.differ.flush();
        self.deliver();
    }

    fn finish(&self, marker: Mutation) {
        self.inner.differ.flush();
        self.inner.doc.borrow_mut().push_mutation(marker);
        self.deliver();
    }

    fn deliver(&self) {
        if self.is_destroyed() {
            return;
        }
        let batch = self.inner.doc.borrow_mut().take_mutations();
        if !batch.is_empty() {
            self.inner.backend.send(&self.inner.id, batch);
        }
    }

    /// Tear the instance down: the root view-model, pending work and the
    /// document content. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        info!(instance = %self.inner.id, "app.destroy");
        if let Some(root) = self.root_vm() {
            root.destroy();
        }
        self.inner.root.set(None);
        self.inner.differ.clear();
        self.inner.turns.clear();
        let leftover: Vec<Vm> = self.inner.vms.borrow_mut().drain().map(|(_, vm)| vm).collect();
        for vm in leftover {
            vm.destroy();
        }
        let mut doc = self.inner.doc.borrow_mut();
        if let Some(body) = doc.body()
            && let Err(err) = doc.remove(body)
        {
            tracing::trace!(%err, "body already gone");
        }
        doc.take_mutations();
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Borrow the document. Release it before calling back into the app.
    #[must_use]
    pub fn document(&self) -> Ref<'_, Document> {
        self.inner.doc.borrow()
    }

    #[must_use]
    pub fn root_vm(&self) -> Option<Vm> {
        self.inner.root.get().and_then(|id| self.inner.vm(id))
    }

    #[must_use]
    pub fn vm(&self, id: VmId) -> Option<Vm> {
        self.inner.vm(id)
    }

    /// Number of live view-models, scopes included.
    #[must_use]
    pub fn vm_count(&self) -> usize {
        self.inner.vms.borrow().len()
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("id", &self.inner.id)
            .field("vms", &self.vm_count())
            .field("pending", &self.inner.differ.pending_len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#![forbid(unsafe_code)]

//! View-models.
//!
//! A [`Vm`] owns one reactive data object, the watchers compiled against it
//! and its child view-models. Two kinds exist:
//!
//! - **Component** view-models are built from a
//!   [`ComponentDef`](crate::ComponentDef) and carry methods, computed
//!   properties, events, lifecycle hooks and an `ids` registry.
//! - **Scope** view-models are created by the compiler for repeat items and
//!   conditional blocks. They hold a few local keys (`$index`, `$value`) and
//!   resolve everything else through their parent.
//!
//! View-models live in the instance arena and refer to each other by
//! [`VmId`]; nothing below the arena holds a strong reference upward.
//!
//! # Invariants
//!
//! 1. The lifecycle state only moves forward
//!    (`Uninit → Init → Created → Ready → Destroyed`).
//! 2. A destroyed view-model has no active watcher and is no longer reachable
//!    through the arena or its parent.
//! 3. Key lookup order is own data, computed, legacy item fields, parent scope.
//!
//! # Failure Modes
//!
//! - **Use after destroy**: reads return the last data, writes are ignored.
//! - **Unknown method**: `call` logs a warning and returns `Null`.

mod events;
mod lifecycle;
mod watch;

pub use events::{Evt, ListenerId};
pub(crate) use lifecycle::{ComponentSpawn, create_component, create_scope};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tracing::warn;
use weave_dom::NodeId;
use weave_reactive::{ReactiveObject, Value, Watcher, WatcherSet, is_tracking};

use crate::app::{App, AppInner};
use crate::compiler::FragmentBlock;
use crate::component::ComponentDef;
use crate::template::NodeTemplate;

use events::Listener;

// ---------------------------------------------------------------------------
// Identity and state
// ---------------------------------------------------------------------------

/// Arena handle of a view-model.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmId(pub(crate) u64);

impl VmId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VmId({})", self.0)
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmKind {
    Component { name: Rc<str> },
    Scope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Uninit,
    Init,
    Created,
    Ready,
    Destroyed,
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

pub(crate) struct Computed {
    pub(crate) watcher: Watcher,
    pub(crate) setter: Option<Rc<dyn Fn(&Vm, Value)>>,
}

/// Entry of the `ids` registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct IdEntry {
    pub(crate) el: Option<NodeId>,
    pub(crate) vm: Option<VmId>,
}

/// The template node a child component was created from, with the
/// view-model its bindings evaluate against.
pub(crate) struct External {
    pub(crate) parent: WeakVm,
    pub(crate) node: Rc<NodeTemplate>,
}

pub(crate) struct VmInner {
    pub(crate) id: VmId,
    pub(crate) kind: VmKind,
    pub(crate) def: Option<Rc<ComponentDef>>,
    pub(crate) app: Weak<AppInner>,
    pub(crate) parent: Option<VmId>,
    pub(crate) children: RefCell<Vec<VmId>>,
    pub(crate) data: ReactiveObject,
    /// Item key whose object fields are readable directly (legacy repeat).
    pub(crate) legacy_value: Option<Rc<str>>,
    pub(crate) computed: RefCell<FxHashMap<Rc<str>, Computed>>,
    pub(crate) watchers: Rc<WatcherSet>,
    pub(crate) listeners: RefCell<FxHashMap<Rc<str>, Vec<Listener>>>,
    pub(crate) next_listener: Cell<u64>,
    pub(crate) ids: RefCell<FxHashMap<Rc<str>, IdEntry>>,
    pub(crate) state: Cell<LifecycleState>,
    pub(crate) is_static: Cell<bool>,
    pub(crate) root_el: Cell<Option<NodeId>>,
    pub(crate) content: RefCell<Option<FragmentBlock>>,
    pub(crate) external: RefCell<Option<External>>,
}

/// Shared handle to a view-model.
#[derive(Clone)]
pub struct Vm {
    pub(crate) inner: Rc<VmInner>,
}

/// Non-owning handle, used by closures stored in watchers and the document.
#[derive(Clone)]
pub struct WeakVm {
    inner: Weak<VmInner>,
}

impl WeakVm {
    #[must_use]
    pub fn upgrade(&self) -> Option<Vm> {
        self.inner.upgrade().map(|inner| Vm { inner })
    }
}

impl Vm {
    pub(crate) fn alloc(
        app: &App,
        kind: VmKind,
        def: Option<Rc<ComponentDef>>,
        parent: Option<VmId>,
        data: ReactiveObject,
        legacy_value: Option<Rc<str>>,
    ) -> Self {
        Self {
            inner: Rc::new(VmInner {
                id: VmId(app.inner.next_id()),
                kind,
                def,
                app: Rc::downgrade(&app.inner),
                parent,
                children: RefCell::new(Vec::new()),
                data,
                legacy_value,
                computed: RefCell::new(FxHashMap::default()),
                watchers: WatcherSet::new(),
                listeners: RefCell::new(FxHashMap::default()),
                next_listener: Cell::new(0),
                ids: RefCell::new(FxHashMap::default()),
                state: Cell::new(LifecycleState::Uninit),
                is_static: Cell::new(false),
                root_el: Cell::new(None),
                content: RefCell::new(None),
                external: RefCell::new(None),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn id(&self) -> VmId {
        self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> &VmKind {
        &self.inner.kind
    }

    #[must_use]
    pub fn is_scope(&self) -> bool {
        matches!(self.inner.kind, VmKind::Scope)
    }

    /// Component type name; `None` for scopes.
    #[must_use]
    pub fn component_name(&self) -> Option<&str> {
        match &self.inner.kind {
            VmKind::Component { name } => Some(name),
            VmKind::Scope => None,
        }
    }

    #[must_use]
    pub fn def(&self) -> Option<&Rc<ComponentDef>> {
        self.inner.def.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state() == LifecycleState::Destroyed
    }

    pub(crate) fn advance(&self, to: LifecycleState) -> bool {
        if to <= self.inner.state.get() {
            return false;
        }
        self.inner.state.set(to);
        true
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakVm {
        WeakVm {
            inner: Rc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // -----------------------------------------------------------------------
    // Tree
    // -----------------------------------------------------------------------

    /// The owning instance, while it is alive.
    #[must_use]
    pub fn app(&self) -> Option<App> {
        self.inner.app.upgrade().map(App::from_inner)
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<VmId> {
        self.inner.parent
    }

    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let id = self.inner.parent?;
        self.inner.app.upgrade()?.vm(id)
    }

    #[must_use]
    pub fn child_ids(&self) -> Vec<VmId> {
        self.inner.children.borrow().clone()
    }

    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        let Some(app) = self.inner.app.upgrade() else {
            return Vec::new();
        };
        self.child_ids()
            .into_iter()
            .filter_map(|id| app.vm(id))
            .collect()
    }

    /// Nearest component view-model: `self` unless this is a scope.
    #[must_use]
    pub fn host(&self) -> Self {
        let mut current = self.clone();
        while current.is_scope() {
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    // -----------------------------------------------------------------------
    // Data
    // -----------------------------------------------------------------------

    /// The view-model's own data object.
    #[must_use]
    pub fn data(&self) -> &ReactiveObject {
        &self.inner.data
    }

    /// Tracked key lookup through data, computed properties and enclosing
    /// scopes.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        let data = &self.inner.data;
        if data.has_own(key) {
            return data.get(key);
        }
        if let Some(value) = self.computed_value(key) {
            return value;
        }
        if let Some(field) = &self.inner.legacy_value
            && let Value::Object(item) = data.peek(field)
            && item.has_own(key)
        {
            return data.get(field).get(key);
        }
        if self.is_scope()
            && let Some(parent) = self.parent()
        {
            return parent.get(key);
        }
        // Subscribes to structural changes so a later add wakes the reader.
        data.get(key)
    }

    /// Write `key`. Unknown keys on a component are added structurally;
    /// scopes forward unknown keys to their parent.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        if self.is_destroyed() {
            return;
        }
        if self.inner.data.has_own(key) {
            self.inner.data.set(key, value);
            return;
        }
        let setter = self
            .inner
            .computed
            .borrow()
            .get(key)
            .map(|computed| computed.setter.clone());
        match setter {
            Some(Some(setter)) => setter(self, value),
            Some(None) => warn!(vm = %self.id(), key, "computed property has no setter"),
            None => {
                if self.is_scope()
                    && let Some(parent) = self.parent()
                {
                    parent.set(key, value);
                    return;
                }
                weave_reactive::set(&Value::Object(self.inner.data.clone()), key, value);
            }
        }
    }

    fn computed_value(&self, key: &str) -> Option<Value> {
        let watcher = self
            .inner
            .computed
            .borrow()
            .get(key)
            .map(|computed| computed.watcher.clone())?;
        let value = watcher.evaluate();
        if is_tracking() {
            watcher.depend();
        }
        Some(value)
    }

    #[must_use]
    pub fn has_computed(&self, key: &str) -> bool {
        self.host().inner.computed.borrow().contains_key(key)
    }

    // -----------------------------------------------------------------------
    // Methods
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn has_method(&self, name: &str) -> bool {
        self.host()
            .inner
            .def
            .as_ref()
            .is_some_and(|def| def.methods.contains_key(name))
    }

    /// Call a method of the nearest component with `self` as receiver.
    pub fn call(&self, name: &str, args: &[Value]) -> Value {
        let method = self
            .host()
            .inner
            .def
            .as_ref()
            .and_then(|def| def.methods.get(name).cloned());
        match method {
            Some(method) => method(self, args),
            None => {
                warn!(vm = %self.id(), method = name, "unknown method");
                Value::Null
            }
        }
    }

    // -----------------------------------------------------------------------
    // Watchers
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn watchers(&self) -> &Rc<WatcherSet> {
        &self.inner.watchers
    }

    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }

    // -----------------------------------------------------------------------
    // Elements
    // -----------------------------------------------------------------------

    /// Root element of the nearest component.
    #[must_use]
    pub fn root_el(&self) -> Option<NodeId> {
        self.host().inner.root_el.get()
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.inner.is_static.get()
    }

    pub(crate) fn set_static(&self) {
        self.inner.is_static.set(true);
    }

    /// Element registered under `id` in the nearest component.
    #[must_use]
    pub fn el(&self, id: &str) -> Option<NodeId> {
        self.host().inner.ids.borrow().get(id).and_then(|entry| entry.el)
    }

    /// Child component registered under `id` in the nearest component.
    #[must_use]
    pub fn vm_by_id(&self, id: &str) -> Option<Self> {
        let vm_id = self.host().inner.ids.borrow().get(id).and_then(|entry| entry.vm)?;
        self.inner.app.upgrade()?.vm(vm_id)
    }

    pub(crate) fn register_id(&self, id: &str, el: Option<NodeId>, vm: Option<VmId>) {
        let host = self.host();
        let mut ids = host.inner.ids.borrow_mut();
        let entry = ids.entry(id.into()).or_default();
        if el.is_some() {
            entry.el = el;
        }
        if vm.is_some() {
            entry.vm = vm;
        }
    }

    pub(crate) fn unregister_id(&self, id: &str) -> Option<IdEntry> {
        self.host().inner.ids.borrow_mut().remove(id)
    }

    pub(crate) fn content_block(&self) -> Option<FragmentBlock> {
        self.inner.content.borrow().clone()
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("state", &self.inner.state.get())
            .field("children", &self.inner.children.borrow().len())
            .field("watchers", &self.inner.watchers.len())
            .finish()
    }
}

impl fmt::Debug for WeakVm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(vm) => write!(f, "WeakVm({})", vm.id()),
            None => f.write_str("WeakVm(<dropped>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::HookKind;
    use crate::config::RuntimeConfig;
    use crate::template::{Binding, NodeTemplate};
    use serde_json::json;
    use weave_dom::NullBackend;

    fn boot(def: Rc<ComponentDef>) -> (App, Vm) {
        let app = App::new("t", RuntimeConfig::default(), NullBackend);
        let name = def.name().to_string();
        app.register_component(def);
        let vm = app.bootstrap(&name, None).unwrap();
        (app, vm)
    }

    fn plain(data: serde_json::Value) -> Rc<ComponentDef> {
        ComponentDef::builder("root")
            .data(data)
            .template(NodeTemplate::new("div"))
            .build()
    }

    #[test]
    fn hooks_fire_in_lifecycle_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut builder = ComponentDef::builder("root").template(NodeTemplate::new("div"));
        for kind in [HookKind::Init, HookKind::Created, HookKind::Ready, HookKind::Destroyed] {
            let log = log.clone();
            builder = builder.hook(kind, move |vm| log.borrow_mut().push((kind, vm.state())));
        }
        let (_app, vm) = boot(builder.build());
        vm.destroy();
        vm.destroy();
        assert_eq!(
            *log.borrow(),
            [
                (HookKind::Init, LifecycleState::Init),
                (HookKind::Created, LifecycleState::Created),
                (HookKind::Ready, LifecycleState::Ready),
                (HookKind::Destroyed, LifecycleState::Destroyed),
            ]
        );
    }

    #[test]
    fn created_hook_sees_data_and_computed() {
        let seen = Rc::new(RefCell::new(Value::Null));
        let s = seen.clone();
        let def = ComponentDef::builder("root")
            .data(json!({"n": 2}))
            .computed("double", |vm| {
                Value::from(vm.get("n").as_f64().unwrap_or(0.0) * 2.0)
            })
            .hook(HookKind::Created, move |vm| *s.borrow_mut() = vm.get("double"))
            .build();
        let (_app, _vm) = boot(def);
        assert_eq!(*seen.borrow(), Value::Number(4.0));
    }

    #[test]
    fn scope_reads_fall_through_and_writes_forward() {
        let (_app, vm) = boot(plain(json!({"title": "a"})));
        let scope = create_scope(
            &vm,
            ReactiveObject::from_pairs([("$index", Value::from(0))]),
            None,
        )
        .unwrap();
        assert!(scope.is_scope());
        assert!(scope.host().ptr_eq(&vm));
        assert_eq!(scope.get("$index"), Value::Number(0.0));
        assert_eq!(scope.get("title"), Value::from("a"));

        scope.set("title", "b");
        assert_eq!(vm.get("title"), Value::from("b"));
        assert!(!vm.data().has_own("$index"));
    }

    #[test]
    fn legacy_item_fields_are_readable_from_the_scope() {
        let (_app, vm) = boot(plain(json!({})));
        let item = Value::from_json(json!({"label": "x"}));
        let scope = create_scope(
            &vm,
            ReactiveObject::from_pairs([("$value", item)]),
            Some("$value".into()),
        )
        .unwrap();
        assert_eq!(scope.get("label"), Value::from("x"));
    }

    #[test]
    fn computed_recomputes_lazily_and_supports_setters() {
        let def = ComponentDef::builder("root")
            .data(json!({"first": "Ada", "last": "L"}))
            .computed("full", |vm| {
                Value::from(format!("{} {}", vm.get("first"), vm.get("last")))
            })
            .computed_with_setter("name", |vm| vm.get("first"), |vm, v| vm.set("first", v))
            .build();
        let (_app, vm) = boot(def);
        assert!(vm.has_computed("full"));
        assert_eq!(vm.get("full"), Value::from("Ada L"));

        vm.set("first", "Grace");
        assert_eq!(vm.get("full"), Value::from("Grace L"));

        vm.set("name", "Joan");
        assert_eq!(vm.get("first"), Value::from("Joan"));

        // No setter: ignored.
        vm.set("full", "x");
        assert_eq!(vm.get("full"), Value::from("Joan L"));
    }

    #[test]
    fn methods_receive_the_calling_view_model() {
        let def = ComponentDef::builder("root")
            .data(json!({"n": 1}))
            .method("add", |vm, args| {
                let by = args.first().and_then(Value::as_f64).unwrap_or(0.0);
                let next = vm.get("n").as_f64().unwrap_or(0.0) + by;
                vm.set("n", next);
                Value::from(next)
            })
            .build();
        let (_app, vm) = boot(def);
        assert!(vm.has_method("add"));
        assert_eq!(vm.call("add", &[Value::from(4)]), Value::Number(5.0));
        assert_eq!(vm.call("missing", &[]), Value::Null);
    }

    #[test]
    fn watch_delivers_the_final_value_once_per_turn() {
        let (app, vm) = boot(plain(json!({"n": 0})));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let watcher = vm.watch(Binding::path("n"), move |v| s.borrow_mut().push(v.clone()));
        assert!(watcher.is_some());

        vm.set("n", 1);
        vm.set("n", 2);
        vm.set("n", 3);
        assert!(seen.borrow().is_empty());
        app.tick();
        assert_eq!(*seen.borrow(), [Value::Number(3.0)]);

        app.tick();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn watch_sync_fires_per_write_and_sees_added_keys() {
        let (_app, vm) = boot(plain(json!({})));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _watcher = vm.watch_sync(Binding::path("fresh"), move |new, old| {
            s.borrow_mut().push((new.clone(), old.clone()));
        });
        vm.set("fresh", 1);
        vm.set("fresh", 2);
        assert_eq!(
            *seen.borrow(),
            [
                (Value::Number(1.0), Value::Null),
                (Value::Number(2.0), Value::Number(1.0)),
            ]
        );
    }

    #[test]
    fn destroy_detaches_everything_once() {
        let (app, vm) = boot(plain(json!({"n": 0})));
        let _w = vm.watch_sync(Binding::path("n"), |_, _| {});
        assert!(vm.watcher_count() > 0);
        let dep = vm.data().property_dep("n").unwrap();
        assert!(dep.subscriber_count() > 0);

        vm.destroy();
        vm.destroy();
        assert!(vm.is_destroyed());
        assert_eq!(vm.watcher_count(), 0);
        assert_eq!(dep.subscriber_count(), 0);
        assert!(app.vm(vm.id()).is_none());

        vm.set("n", 3);
        assert_eq!(vm.get("n"), Value::Number(0.0));
    }

    #[test]
    fn events_bubble_and_descend_until_stopped() {
        let child = ComponentDef::builder("child")
            .template(NodeTemplate::new("div"))
            .build();
        let root = ComponentDef::builder("root")
            .template(NodeTemplate::new("div").child(NodeTemplate::new("child").id(json!("kid"))))
            .build();
        let app = App::new("t", RuntimeConfig::default(), NullBackend);
        app.register_component(child);
        app.register_component(root);
        let vm = app.bootstrap("root", None).unwrap();
        let kid = vm.vm_by_id("kid").unwrap();
        assert_eq!(kid.parent_id(), Some(vm.id()));
        assert_eq!(vm.el("kid"), kid.root_el());

        let hits = Rc::new(RefCell::new(Vec::new()));
        let h = hits.clone();
        vm.on("up", move |vm, evt| h.borrow_mut().push((vm.id(), evt.detail().clone())));
        kid.dispatch("up", Value::from("x"));
        assert_eq!(*hits.borrow(), [(vm.id(), Value::from("x"))]);

        let stopper = kid.on("up", |_, evt| evt.stop());
        kid.dispatch("up", Value::Null);
        assert_eq!(hits.borrow().len(), 1);
        kid.off("up", Some(stopper));
        assert_eq!(kid.listener_count("up"), 0);

        let h = hits.clone();
        kid.on("down", move |vm, _| h.borrow_mut().push((vm.id(), Value::Null)));
        vm.broadcast("down", Value::Null);
        assert_eq!(hits.borrow().last(), Some(&(kid.id(), Value::Null)));
    }

    #[test]
    fn dynamic_ids_move_their_entry() {
        let def = ComponentDef::builder("root")
            .data(json!({"which": "a"}))
            .template(NodeTemplate::new("div").child(NodeTemplate::new("text").id(Binding::path("which"))))
            .build();
        let (_app, vm) = boot(def);
        let el = vm.el("a").unwrap();
        vm.set("which", "b");
        assert_eq!(vm.el("a"), None);
        assert_eq!(vm.el("b"), Some(el));
    }

    #[test]
    fn static_templates_watch_nothing() {
        let def = ComponentDef::builder("root")
            .data(json!({"n": 1}))
            .template(
                NodeTemplate::new("div")
                    .static_bindings()
                    .child(NodeTemplate::new("text").attr("value", Binding::path("n"))),
            )
            .build();
        let (app, vm) = boot(def);
        assert!(vm.is_static());
        assert_eq!(vm.watcher_count(), 0);
        vm.set("n", 2);
        app.tick();
        let doc = app.document();
        assert_eq!(doc.leaf_values(doc.root()), ["1"]);
    }
}

#![forbid(unsafe_code)]

//! Construction and teardown of view-models.
//!
//! A component view-model is built in a fixed order, each step visible to
//! the hooks that follow it:
//!
//! 1. Creator bindings: static flag, `id` registration, event wiring.
//! 2. `hook:init`.
//! 3. Data observed, computed properties and methods installed, props bound.
//! 4. `hook:created`.
//! 5. Template compiled, caller content compiled into the content slot.
//! 6. `hook:ready`.
//!
//! Teardown runs the reverse way: watchers first, then children (most recent
//! first), then the structural subscription, then `hook:destroyed`.

use std::rc::Rc;

use tracing::debug;
use weave_reactive::{ReactiveObject, StructuralOwner, Value, Watcher, WatcherOptions, observe};

use super::{Computed, External, LifecycleState, Vm, VmInner, VmKind};
use crate::app::App;
use crate::compiler::{self, Dest, Meta, directive};
use crate::component::ComponentDef;
use crate::template::{EventSpec, NodeTemplate};

/// Everything needed to create a component view-model.
pub(crate) struct ComponentSpawn<'a> {
    pub(crate) def: Rc<ComponentDef>,
    pub(crate) parent: Option<&'a Vm>,
    /// Template node the component was referenced from.
    pub(crate) node: Option<Rc<NodeTemplate>>,
    /// Repeat item whose object fields become props.
    pub(crate) repeat_item: Option<Value>,
    /// Data overriding the definition's initial data.
    pub(crate) data: Option<serde_json::Value>,
}

fn initial_data(def: &ComponentDef, overrides: Option<serde_json::Value>) -> ReactiveObject {
    let data = ReactiveObject::from_pairs(
        def.data
            .iter()
            .map(|(k, v)| (k.as_str(), Value::from_json(v.clone()))),
    );
    if let Some(serde_json::Value::Object(extra)) = overrides {
        for (key, value) in extra {
            data.set(&key, Value::from_json(value));
        }
    }
    data
}

fn register(app: &App, vm: &Vm, parent: Option<&Vm>) {
    app.inner.insert_vm(vm.clone());
    if let Some(parent) = parent {
        parent.inner.children.borrow_mut().push(vm.id());
    }
}

fn observe_data(vm: &Vm) {
    let owner: Rc<dyn StructuralOwner> = vm.inner.clone();
    observe(&Value::Object(vm.inner.data.clone()), Some(&owner));
}

/// Build, compile and mount a component view-model into `dest`.
pub(crate) fn create_component(app: &App, spawn: ComponentSpawn<'_>, dest: &Dest) -> Vm {
    let ComponentSpawn {
        def,
        parent,
        node,
        repeat_item,
        data,
    } = spawn;
    let vm = Vm::alloc(
        app,
        VmKind::Component {
            name: def.name.clone(),
        },
        Some(def.clone()),
        parent.map(Vm::id),
        initial_data(&def, data),
        None,
    );
    register(app, &vm, parent);

    // Creator bindings.
    if parent.is_some_and(Vm::is_static) || node.as_ref().is_some_and(|n| n.is_static) {
        vm.set_static();
    }
    if let (Some(parent), Some(node)) = (parent, node.as_ref()) {
        if let Some(id) = &node.id {
            directive::bind_id(parent, id, None, Some(vm.id()));
        }
        for (event, spec) in &node.events {
            let caller = parent.downgrade();
            let spec = spec.clone();
            vm.on(event, move |_, evt| {
                let Some(caller) = caller.upgrade() else {
                    return;
                };
                match &spec {
                    EventSpec::Method(name) => {
                        caller.call(name, std::slice::from_ref(evt.detail()));
                    }
                    EventSpec::Func(f) => f(&caller, evt.detail()),
                }
            });
        }
        *vm.inner.external.borrow_mut() = Some(External {
            parent: parent.downgrade(),
            node: node.clone(),
        });
    }
    for (event, method) in &def.events {
        let method = method.clone();
        vm.on(event, move |vm, evt| {
            vm.call(&method, std::slice::from_ref(evt.detail()));
        });
    }
    for (kind, hook) in &def.hooks {
        let hook = hook.clone();
        vm.on(kind.event(), move |vm, _| hook(vm));
    }

    vm.advance(LifecycleState::Init);
    debug!(vm = %vm.id(), component = %def.name, "vm.init");
    vm.emit("hook:init", Value::Null);
    if vm.is_destroyed() {
        return vm;
    }

    observe_data(&vm);
    install_computed(&vm, &def);
    if let Some(parent) = parent {
        bind_props(&vm, &def, parent, node.as_deref(), repeat_item.as_ref());
    }

    vm.advance(LifecycleState::Created);
    debug!(vm = %vm.id(), component = %def.name, "vm.created");
    vm.emit("hook:created", Value::Null);
    if vm.is_destroyed() {
        return vm;
    }

    compiler::compile(&vm, &def.template, dest, &Meta::default());
    if let (Some(parent), Some(node), Some(block)) = (parent, node.as_ref(), vm.content_block())
        && !node.children.is_empty()
    {
        let target = Dest::Block(block);
        for child in &node.children {
            compiler::compile(parent, child, &target, &Meta::default());
        }
    }

    if vm.is_destroyed() {
        return vm;
    }
    vm.advance(LifecycleState::Ready);
    debug!(vm = %vm.id(), component = %def.name, "vm.ready");
    vm.emit("hook:ready", Value::Null);
    vm
}

fn install_computed(vm: &Vm, def: &ComponentDef) {
    let mut computed = vm.inner.computed.borrow_mut();
    for (name, spec) in &def.computed {
        let weak = vm.downgrade();
        let get = spec.get.clone();
        let watcher = Watcher::with_options(
            move || weak.upgrade().map_or(Value::Null, |vm| get(&vm)),
            None,
            WatcherOptions::lazy(),
            Some(vm.watchers()),
        );
        computed.insert(
            name.clone(),
            Computed {
                watcher,
                setter: spec.set.clone(),
            },
        );
    }
}

fn bind_props(
    vm: &Vm,
    def: &ComponentDef,
    parent: &Vm,
    node: Option<&NodeTemplate>,
    repeat_item: Option<&Value>,
) {
    if let Some(Value::Object(item)) = repeat_item {
        for (key, value) in item.peek_entries() {
            if def.accepts_prop(&key) {
                vm.set(&key, value);
            }
        }
    }
    let Some(node) = node else {
        return;
    };
    for (key, binding) in &node.attr {
        if !def.accepts_prop(key) {
            continue;
        }
        let value = if binding.is_dynamic() {
            let child = vm.downgrade();
            let prop = key.clone();
            directive::watch(parent, binding.getter(), move |_, value| {
                if let Some(child) = child.upgrade() {
                    child.set(&prop, value);
                }
            })
        } else {
            binding.eval(parent)
        };
        vm.set(key, value);
    }
}

/// Create a scope view-model under `parent` holding `data`.
pub(crate) fn create_scope(
    parent: &Vm,
    data: ReactiveObject,
    legacy_value: Option<Rc<str>>,
) -> Option<Vm> {
    let app = parent.app()?;
    let vm = Vm::alloc(
        &app,
        VmKind::Scope,
        None,
        Some(parent.id()),
        data,
        legacy_value,
    );
    register(&app, &vm, Some(parent));
    if parent.is_static() {
        vm.set_static();
    }
    observe_data(&vm);
    vm.advance(LifecycleState::Ready);
    Some(vm)
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

impl Vm {
    /// Tear the view-model and its subtree down. Calling it again is a
    /// no-op. The document is left alone; removing the rendered nodes is the
    /// caller's job.
    pub fn destroy(&self) {
        if !self.advance(LifecycleState::Destroyed) {
            return;
        }
        debug!(vm = %self.id(), component = self.component_name().unwrap_or("<scope>"), "vm.destroyed");

        self.inner.watchers.teardown_all();
        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        if let Some(app) = self.inner.app.upgrade() {
            for id in children.iter().rev() {
                if let Some(child) = app.vm(*id) {
                    child.destroy();
                }
            }
        }
        if let Some(ob) = self.inner.data.observer() {
            ob.remove_owner(self.id().raw());
        }

        if !self.is_scope() {
            self.emit_evt(&super::Evt::new("hook:destroyed", Value::Null));
        }
        self.clear_listeners();
        self.inner.computed.borrow_mut().clear();
        self.inner.ids.borrow_mut().clear();
        self.inner.content.borrow_mut().take();
        self.inner.external.borrow_mut().take();
        self.inner.root_el.set(None);

        if let Some(app) = self.inner.app.upgrade() {
            if let Some(parent) = self.inner.parent.and_then(|id| app.vm(id)) {
                parent.inner.children.borrow_mut().retain(|c| *c != self.id());
            }
            app.remove_vm(self.id());
        }
    }
}

// ---------------------------------------------------------------------------
// Structural changes
// ---------------------------------------------------------------------------

impl VmInner {
    /// Re-run every watcher of this view-model and of its scopes.
    fn digest(&self) {
        for watcher in self.watchers.snapshot() {
            watcher.update();
        }
        let Some(app) = self.app.upgrade() else {
            return;
        };
        for id in self.children.borrow().clone() {
            if let Some(child) = app.vm(id)
                && child.is_scope()
            {
                child.inner.digest();
            }
        }
    }
}

impl StructuralOwner for VmInner {
    fn owner_id(&self) -> u64 {
        self.id.raw()
    }

    fn key_added(&self, _key: &str) {
        if self.state.get() != LifecycleState::Destroyed {
            self.digest();
        }
    }

    fn key_removed(&self, _key: &str) {
        if self.state.get() != LifecycleState::Destroyed {
            self.digest();
        }
    }
}

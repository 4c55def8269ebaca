#![forbid(unsafe_code)]

//! Directive bindings.
//!
//! Every reactive binding is one watcher owned by the view-model it is
//! evaluated against. Watcher callbacks never edit the document directly:
//! [`deferred`] records the latest value and appends a single differ handler
//! per turn, which applies whatever the value is when the flush reaches it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use weave_dom::{Document, EventHandler, NodeId};
use weave_reactive::{Value, Watcher, WatcherOptions, untracked};

use super::FragmentBlock;
use crate::differ::{MutationKind, TargetKey};
use crate::template::{Binding, EventSpec, Getter, NodeTemplate};
use crate::vm::Vm;

/// What a deferred handler edits; decides its flush depth and key.
pub(crate) enum Anchor {
    Node(NodeId),
    Block(FragmentBlock),
    /// A user watch: runs after all document work of its pass.
    Watcher(u64),
}

impl Anchor {
    /// `None` once the anchored nodes are gone.
    fn locate(&self, doc: &Document) -> Option<(u32, TargetKey)> {
        match self {
            Self::Node(id) => doc
                .is_alive(*id)
                .then(|| (doc.depth(*id), TargetKey::Node(*id))),
            Self::Block(block) => {
                if !block.is_alive(doc) {
                    return None;
                }
                let parent = block.parent(doc)?;
                Some((doc.depth(parent).saturating_add(1), TargetKey::Block(block.id())))
            }
            Self::Watcher(key) => Some((u32::MAX, TargetKey::Watcher(*key))),
        }
    }
}

pub(crate) fn with_doc<R>(vm: &Vm, f: impl FnOnce(&mut Document) -> R) -> Option<R> {
    let app = vm.app()?;
    let mut doc = app.inner.doc.borrow_mut();
    Some(f(&mut doc))
}

// ---------------------------------------------------------------------------
// Watching
// ---------------------------------------------------------------------------

/// Create a watcher of `getter` owned by `vm`. `callback` runs on change
/// while `vm` is alive.
pub(crate) fn subscribe(
    vm: &Vm,
    getter: Getter,
    mut callback: impl FnMut(&Vm, Value) + 'static,
) -> Watcher {
    let weak = vm.downgrade();
    let owner = vm.downgrade();
    Watcher::with_options(
        move || weak.upgrade().map_or(Value::Null, |vm| getter(&vm)),
        Some(Box::new(move |value: &Value, _old: &Value| {
            if let Some(vm) = owner.upgrade()
                && !vm.is_destroyed()
            {
                callback(&vm, value.clone());
            }
        })),
        WatcherOptions::default(),
        Some(vm.watchers()),
    )
}

/// Current value of `getter`, re-delivered to `callback` on change. Static
/// view-models evaluate once and watch nothing.
pub(crate) fn watch(
    vm: &Vm,
    getter: Getter,
    callback: impl FnMut(&Vm, Value) + 'static,
) -> Value {
    if vm.is_static() {
        return untracked(|| getter(vm));
    }
    subscribe(vm, getter, callback).value()
}

#[derive(Default)]
struct Pending {
    latest: RefCell<Value>,
    recorded: Cell<bool>,
}

/// The one queued handler of a [`Pending`]. Dropping it unrun (a panic
/// earlier in the pass, [`Differ::clear`](crate::differ::Differ::clear), a
/// coalescing overwrite) clears `recorded` so the next change schedules again.
struct Queued {
    pending: Rc<Pending>,
    live: bool,
}

impl Queued {
    fn new(pending: Rc<Pending>) -> Self {
        pending.recorded.set(true);
        Self { pending, live: true }
    }

    /// Release the slot and take the value to apply. Changes made while the
    /// handler runs queue a fresh handler.
    fn release(&mut self) -> Value {
        self.live = false;
        self.pending.recorded.set(false);
        self.pending.latest.take()
    }
}

impl Drop for Queued {
    fn drop(&mut self) {
        if self.live {
            self.pending.recorded.set(false);
        }
    }
}

/// Watcher callback that coalesces changes into one differ handler per
/// flush. The handler sees the last value written before it runs.
pub(crate) fn deferred(
    kind: MutationKind,
    anchor: Anchor,
    handler: Rc<dyn Fn(&Vm, Value)>,
) -> impl FnMut(&Vm, Value) + 'static {
    let pending = Rc::new(Pending::default());
    move |vm: &Vm, value: Value| {
        *pending.latest.borrow_mut() = value;
        if pending.recorded.get() {
            return;
        }
        let Some(app) = vm.app() else {
            return;
        };
        let located = anchor.locate(&app.inner.doc.borrow());
        let Some((depth, key)) = located else {
            return;
        };
        let mut queued = Queued::new(pending.clone());
        let handler = handler.clone();
        let weak = vm.downgrade();
        app.inner.differ.append(
            kind,
            depth,
            key,
            Box::new(move || {
                let value = queued.release();
                if let Some(vm) = weak.upgrade()
                    && !vm.is_destroyed()
                {
                    handler(&vm, value);
                }
            }),
        );
    }
}

/// Apply `binding` to `el` through `apply`, now and on every change.
fn bind_value(vm: &Vm, el: NodeId, binding: &Binding, apply: Rc<dyn Fn(&mut Document, Value)>) {
    let value = if binding.is_dynamic() {
        let on_change = apply.clone();
        watch(
            vm,
            binding.getter(),
            deferred(
                MutationKind::Element,
                Anchor::Node(el),
                Rc::new(move |vm: &Vm, value: Value| {
                    with_doc(vm, |doc| on_change(doc, value));
                }),
            ),
        )
    } else {
        binding.eval(vm)
    };
    with_doc(vm, |doc| apply(doc, value));
}

fn ignore(result: weave_dom::document::Result<()>) {
    if let Err(err) = result {
        tracing::trace!(%err, "binding target gone");
    }
}

// ---------------------------------------------------------------------------
// Element bindings
// ---------------------------------------------------------------------------

/// Bind attributes, styles, classes and events of `node` to `el`.
pub(crate) fn bind_element(vm: &Vm, el: NodeId, node: &NodeTemplate) {
    for (key, binding) in &node.attr {
        bind_attr(vm, el, key, binding);
    }
    for (key, binding) in &node.style {
        bind_style(vm, el, key, binding);
    }
    if let Some(classes) = &node.class_list {
        bind_class(vm, el, classes);
    }
    for (event, spec) in &node.events {
        bind_event(vm, el, event, spec);
    }
}

fn bind_attr(vm: &Vm, el: NodeId, key: &Rc<str>, binding: &Binding) {
    let key = key.clone();
    bind_value(
        vm,
        el,
        binding,
        Rc::new(move |doc: &mut Document, value: Value| {
            ignore(doc.set_attr(el, &key, value.to_json()));
        }),
    );
}

fn bind_style(vm: &Vm, el: NodeId, key: &Rc<str>, binding: &Binding) {
    let key = key.clone();
    bind_value(
        vm,
        el,
        binding,
        Rc::new(move |doc: &mut Document, value: Value| {
            ignore(doc.set_style(el, &key, value.to_json()));
        }),
    );
}

/// Class names in a class-list value: an array of names or a space
/// separated string.
fn class_names(value: &Value) -> Vec<String> {
    match value {
        Value::Str(s) => s.split_whitespace().map(str::to_string).collect(),
        Value::Array(items) => items
            .peek_vec()
            .iter()
            .filter(|v| !v.is_null())
            .map(ToString::to_string)
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Resolve classes against the stylesheet of `vm`'s component.
fn bind_class(vm: &Vm, el: NodeId, binding: &Binding) {
    let sheet = vm.host().def().cloned();
    bind_value(
        vm,
        el,
        binding,
        Rc::new(move |doc: &mut Document, value: Value| {
            let names = class_names(&value);
            let style = sheet.as_ref().map_or_else(BTreeMap::new, |def| {
                def.class_style(names.iter().map(String::as_str))
            });
            ignore(doc.set_class_style(el, style));
        }),
    );
}

fn event_handler(vm: &Vm, spec: &EventSpec) -> EventHandler {
    let weak = vm.downgrade();
    let spec = spec.clone();
    Rc::new(move |payload: &serde_json::Value| {
        let Some(vm) = weak.upgrade() else {
            return;
        };
        if vm.is_destroyed() {
            return;
        }
        let arg = Value::from_json(payload.clone());
        match &spec {
            EventSpec::Method(name) => {
                vm.call(name, std::slice::from_ref(&arg));
            }
            EventSpec::Func(f) => f(&vm, &arg),
        }
    })
}

fn bind_event(vm: &Vm, el: NodeId, event: &str, spec: &EventSpec) {
    let handler = event_handler(vm, spec);
    with_doc(vm, |doc| ignore(doc.add_event(el, event, handler)));
}

fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Str(s) if s.is_empty() => None,
        other => Some(other.to_string()),
    }
}

/// Register `el` and/or the child `child` under the id `binding` evaluates
/// to, in the component owning `vm`. A dynamic id moves the entry on change.
pub(crate) fn bind_id(
    vm: &Vm,
    binding: &Binding,
    el: Option<NodeId>,
    child: Option<crate::vm::VmId>,
) {
    let current: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let tracked = current.clone();
    let on_change = move |vm: &Vm, value: Value| {
        let previous = tracked.borrow_mut().take();
        let entry = previous.and_then(|old| vm.unregister_id(&old));
        if let Some(key) = id_key(&value) {
            let el = entry.and_then(|e| e.el).or(el);
            let child = entry.and_then(|e| e.vm).or(child);
            vm.register_id(&key, el, child);
            *tracked.borrow_mut() = Some(key);
        }
    };
    let value = if binding.is_dynamic() {
        watch(vm, binding.getter(), on_change)
    } else {
        binding.eval(vm)
    };
    if let Some(key) = id_key(&value) {
        vm.register_id(&key, el, child);
        *current.borrow_mut() = Some(key);
    }
}

/// Apply the creator's bindings to the root element of a child component:
/// its id entry, class list and inline style (both resolved in the creator)
/// and its event handlers (calling creator methods).
pub(crate) fn apply_external(child: &Vm, el: NodeId) {
    let external = child
        .inner
        .external
        .borrow()
        .as_ref()
        .map(|ext| (ext.parent.upgrade(), ext.node.clone()));
    let Some((Some(parent), node)) = external else {
        return;
    };
    if let Some(id) = &node.id
        && let Some(key) = id_key(&untracked(|| id.eval(&parent)))
    {
        parent.register_id(&key, Some(el), Some(child.id()));
    }
    if let Some(classes) = &node.class_list {
        bind_class(&parent, el, classes);
    }
    for (key, binding) in &node.style {
        bind_style(&parent, el, key, binding);
    }
    for (event, spec) in &node.events {
        bind_event(&parent, el, event, spec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_reactive::ObservableArray;

    #[test]
    fn class_names_accepts_strings_and_arrays() {
        assert_eq!(class_names(&Value::from("a  b c")), ["a", "b", "c"]);
        let arr = ObservableArray::from_vec(vec![Value::from("x"), Value::Null, Value::from("y")]);
        assert_eq!(class_names(&Value::Array(arr)), ["x", "y"]);
        assert!(class_names(&Value::Number(1.0)).is_empty());
    }

    #[test]
    fn id_keys_skip_empty_values() {
        assert_eq!(id_key(&Value::from("main")), Some("main".to_string()));
        assert_eq!(id_key(&Value::Number(3.0)), Some("3".to_string()));
        assert_eq!(id_key(&Value::from("")), None);
        assert_eq!(id_key(&Value::Null), None);
    }
}

#![forbid(unsafe_code)]

//! Template compiler.
//!
//! [`compile`] walks a template against a view-model and renders it into a
//! destination (an element or a [`FragmentBlock`]). Each node goes through a
//! fixed priority chain; the first matching rule handles it:
//!
//! 1. fragment: a block holding each child in order
//! 2. `content`/`slot`: a block marking where caller content goes
//! 3. repeat (unless already resolved): one scope per item, keyed
//!    reconciliation on change
//! 4. shown (unless already resolved): a block filled while the guard holds
//! 5. dynamic type: a block recompiled when the type changes
//! 6. registered component: a child view-model
//! 7. anything else: a native element with its bindings and children
//!
//! Rules 3 to 5 recurse into the same node with the resolved directive
//! recorded in [`Meta`].
//!
//! # Failure Modes
//!
//! - **Repeat or shown directly under the document root**: logged and
//!   skipped, since the document root cannot host anchors for a body.
//! - **Destroyed view-model**: nothing is compiled.

mod block;
mod conditional;
pub(crate) mod directive;
mod repeat;

pub use block::{FragmentBlock, Target};

use std::rc::Rc;

use tracing::warn;
use weave_dom::{NodeId, Role};
use weave_reactive::Value;

use crate::component::ComponentDef;
use crate::template::{AppendMode, NodeTemplate, Template, TypeSpec};
use crate::vm::{ComponentSpawn, Vm, create_component};
use directive::with_doc;

/// Where compiled output goes.
#[derive(Clone, Debug)]
pub(crate) enum Dest {
    Element(NodeId),
    Block(FragmentBlock),
}

/// Directives already resolved for the node being compiled.
#[derive(Clone, Debug, Default)]
pub(crate) struct Meta {
    pub(crate) repeat_resolved: bool,
    pub(crate) shown_resolved: bool,
    pub(crate) type_override: Option<Rc<str>>,
    /// Item being rendered by the enclosing repeat.
    pub(crate) repeat_item: Option<Value>,
}

fn is_document(vm: &Vm, dest: &Dest) -> bool {
    match dest {
        Dest::Element(id) => with_doc(vm, |doc| doc.root() == *id).unwrap_or(false),
        Dest::Block(_) => false,
    }
}

/// Create a block attached to `dest`.
pub(crate) fn new_block(vm: &Vm, dest: &Dest) -> Option<FragmentBlock> {
    let app = vm.app()?;
    let id = app.inner.next_id();
    let mut doc = app.inner.doc.borrow_mut();
    Some(FragmentBlock::create(&mut doc, id, dest))
}

fn attach(vm: &Vm, target: &Target, dest: &Dest) {
    with_doc(vm, |doc| block::attach(doc, target, dest));
}

/// Compile `template` against `vm` into `dest`.
pub(crate) fn compile(vm: &Vm, template: &Template, dest: &Dest, meta: &Meta) {
    if vm.is_destroyed() {
        return;
    }
    let node = match template {
        Template::Fragment(children) => {
            let Some(block) = new_block(vm, dest) else {
                return;
            };
            let inner = Dest::Block(block);
            for child in children.iter() {
                compile(vm, child, &inner, meta);
            }
            return;
        }
        Template::Node(node) => node,
    };

    if node.is_content() {
        if let Some(block) = new_block(vm, dest) {
            *vm.host().inner.content.borrow_mut() = Some(block);
        }
        return;
    }

    if let Some(spec) = &node.repeat
        && !meta.repeat_resolved
    {
        if is_document(vm, dest) {
            warn!(vm = %vm.id(), "repeat on the document root is not supported");
            return;
        }
        repeat::compile_repeat(vm, node, spec, dest, meta);
        return;
    }

    if let Some(guard) = &node.shown
        && !meta.shown_resolved
    {
        if is_document(vm, dest) {
            warn!(vm = %vm.id(), "shown on the document root is not supported");
            return;
        }
        conditional::compile_shown(vm, node, guard, dest, meta);
        return;
    }

    let tag: Rc<str> = match (&meta.type_override, &node.kind) {
        (Some(name), _) | (None, TypeSpec::Literal(name)) => name.clone(),
        (None, TypeSpec::Dynamic(getter)) => {
            conditional::compile_type(vm, node, getter, dest, meta);
            return;
        }
    };

    if let Some(def) = vm.app().and_then(|app| app.inner.component(&tag)) {
        compile_custom(vm, node, def, dest, meta);
        return;
    }
    compile_native(vm, node, &tag, dest);
}

fn compile_custom(
    vm: &Vm,
    node: &Rc<NodeTemplate>,
    def: Rc<ComponentDef>,
    dest: &Dest,
    meta: &Meta,
) {
    let Some(app) = vm.app() else {
        return;
    };
    create_component(
        &app,
        ComponentSpawn {
            def,
            parent: Some(vm),
            node: Some(node.clone()),
            repeat_item: meta.repeat_item.clone(),
            data: None,
        },
        dest,
    );
}

fn compile_native(vm: &Vm, node: &NodeTemplate, tag: &str, dest: &Dest) {
    let Some(app) = vm.app() else {
        return;
    };
    if node.is_static {
        vm.set_static();
    }
    let leaf = app.inner.config.is_leaf(tag);
    let role = if leaf {
        Role::Leaf
    } else if node.append == AppendMode::Tree {
        Role::Composite
    } else {
        Role::Native
    };
    let body = is_document(vm, dest);
    let el = {
        let mut doc = app.inner.doc.borrow_mut();
        if body {
            doc.create_body(tag)
        } else {
            doc.create_element(tag, role)
        }
    };

    let host = vm.host();
    if host.inner.root_el.get().is_none() && !host.is_destroyed() {
        host.inner.root_el.set(Some(el));
        directive::apply_external(&host, el);
    }
    if let Some(id) = &node.id {
        directive::bind_id(vm, id, Some(el), None);
    }
    directive::bind_element(vm, el, node);

    if role == Role::Composite {
        compile_children(vm, node, el);
        attach(vm, &Target::Element(el), dest);
    } else {
        attach(vm, &Target::Element(el), dest);
        if !leaf {
            compile_children(vm, node, el);
        }
    }
}

fn compile_children(vm: &Vm, node: &NodeTemplate, el: NodeId) {
    let dest = Dest::Element(el);
    for child in &node.children {
        compile(vm, child, &dest, &Meta::default());
    }
}

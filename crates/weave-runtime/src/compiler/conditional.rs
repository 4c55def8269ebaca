#![forbid(unsafe_code)]

//! Guarded and dynamically typed blocks.
//!
//! Both render a node into a [`FragmentBlock`] under a fresh scope
//! view-model, so everything compiled inside can be dropped by destroying
//! the scope and clearing the block.

use std::rc::Rc;

use tracing::warn;
use weave_reactive::{ReactiveObject, Value};

use super::block;
use super::directive::{self, Anchor, with_doc};
use super::{Dest, FragmentBlock, Meta, compile, new_block};
use crate::differ::MutationKind;
use crate::template::{Binding, Getter, NodeTemplate, Template};
use crate::vm::{Vm, create_scope};

struct BlockCtx {
    template: Rc<NodeTemplate>,
    meta: Meta,
    block: FragmentBlock,
}

fn render_into(vm: &Vm, ctx: &BlockCtx, meta: &Meta) {
    let Some(scope) = create_scope(vm, ReactiveObject::new(), None) else {
        return;
    };
    ctx.block.replace_scope(Some(scope.id()));
    compile(
        &scope,
        &Template::Node(ctx.template.clone()),
        &Dest::Block(ctx.block.clone()),
        meta,
    );
}

fn discard_scope(vm: &Vm, block: &FragmentBlock) {
    if let Some(id) = block.replace_scope(None)
        && let Some(scope) = vm.app().and_then(|app| app.inner.vm(id))
    {
        scope.destroy();
    }
    with_doc(vm, |doc| block::clear(doc, block));
}

// ---------------------------------------------------------------------------
// Shown
// ---------------------------------------------------------------------------

pub(super) fn compile_shown(
    vm: &Vm,
    node: &Rc<NodeTemplate>,
    guard: &Binding,
    dest: &Dest,
    meta: &Meta,
) {
    let Some(block) = new_block(vm, dest) else {
        return;
    };
    let ctx = Rc::new(BlockCtx {
        template: node.clone(),
        meta: Meta {
            shown_resolved: true,
            ..meta.clone()
        },
        block,
    });
    let on_change = ctx.clone();
    let value = directive::watch(
        vm,
        guard.getter(),
        directive::deferred(
            MutationKind::Shown,
            Anchor::Block(ctx.block.clone()),
            Rc::new(move |vm: &Vm, value: Value| toggle(vm, &on_change, value.truthy())),
        ),
    );
    toggle(vm, &ctx, value.truthy());
}

fn toggle(vm: &Vm, ctx: &BlockCtx, display: bool) {
    if ctx.block.display() == display {
        return;
    }
    ctx.block.set_display(display);
    if display {
        render_into(vm, ctx, &ctx.meta);
    } else {
        discard_scope(vm, &ctx.block);
    }
}

// ---------------------------------------------------------------------------
// Dynamic type
// ---------------------------------------------------------------------------

pub(super) fn compile_type(
    vm: &Vm,
    node: &Rc<NodeTemplate>,
    getter: &Getter,
    dest: &Dest,
    meta: &Meta,
) {
    let Some(block) = new_block(vm, dest) else {
        return;
    };
    let ctx = Rc::new(BlockCtx {
        template: node.clone(),
        meta: Meta {
            repeat_resolved: true,
            shown_resolved: true,
            ..meta.clone()
        },
        block,
    });
    let on_change = ctx.clone();
    let value = directive::watch(
        vm,
        getter.clone(),
        directive::deferred(
            MutationKind::Shown,
            Anchor::Block(ctx.block.clone()),
            Rc::new(move |vm: &Vm, value: Value| retype(vm, &on_change, &value)),
        ),
    );
    retype(vm, &ctx, &value);
}

/// Drop whatever the block holds and render the node as type `value`.
fn retype(vm: &Vm, ctx: &BlockCtx, value: &Value) {
    discard_scope(vm, &ctx.block);
    let name = value.to_string();
    if name.is_empty() || value.is_composite() {
        warn!(vm = %vm.id(), value = %value, "dynamic type did not resolve to a name");
        return;
    }
    let meta = Meta {
        type_override: Some(name.into()),
        ..ctx.meta.clone()
    };
    render_into(vm, ctx, &meta);
}

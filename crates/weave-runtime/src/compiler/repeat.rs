#![forbid(unsafe_code)]

//! Keyed list rendering.
//!
//! A repeat node renders into a [`FragmentBlock`]; every item gets a scope
//! view-model holding its index and value, and the targets the item attached
//! to the block are recorded with it. When the source changes, items are
//! matched by identity and reused in place instead of recompiled.
//!
//! Identity of an item:
//!
//! - with `track_by`: the value of that field (an empty or missing value
//!   makes the item unmatchable; composite values compare by reference)
//! - in legacy mode: the item itself for objects and arrays, the index for
//!   anything else
//! - otherwise: the index
//!
//! # Invariants
//!
//! 1. After a reconcile the block content follows the order of the new
//!    source, and `block.items` lines up with it one to one.
//! 2. A reused item keeps its scope view-model; only its index and value
//!    keys are written.
//! 3. Every old item is either reused exactly once or destroyed exactly once.
//!
//! # Failure Modes
//!
//! - **Duplicate identities in the old list**: the first is reused, the rest
//!   are destroyed.
//! - **Duplicate identities in the new list**: the first occurrence takes
//!   the old item, later ones are compiled fresh.
//! - **Positional identity**: inserting anywhere but the tail rewrites the
//!   index and value of every following item instead of moving them.

use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};
use weave_reactive::{ReactiveObject, Value};

use super::block::{self, RepeatItem, Target};
use super::directive::{self, Anchor, with_doc};
use super::{Dest, FragmentBlock, Meta, compile, new_block};
use crate::app::App;
use crate::differ::MutationKind;
use crate::template::{NodeTemplate, RepeatSpec, Template};
use crate::vm::{Vm, create_scope};

struct RepeatCtx {
    template: Rc<NodeTemplate>,
    spec: RepeatSpec,
    /// Meta every item is compiled with.
    meta: Meta,
    block: FragmentBlock,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Identity {
    /// Canonical JSON text of a primitive `track_by` value.
    Key(String),
    /// Address of a composite value.
    Ref(usize),
    Index(usize),
}

fn by_ref(value: &Value) -> Option<Identity> {
    match value {
        Value::Object(obj) => Some(Identity::Ref(obj.ptr_id())),
        Value::Array(arr) => Some(Identity::Ref(arr.ptr_id())),
        _ => None,
    }
}

fn identity(spec: &RepeatSpec, item: &Value, index: usize) -> Option<Identity> {
    if let Some(field) = &spec.track_by {
        let key = item.peek(field);
        return match &key {
            Value::Null => None,
            Value::Str(s) if s.is_empty() => None,
            Value::Object(_) | Value::Array(_) => by_ref(&key),
            other => Some(Identity::Key(other.to_json().to_string())),
        };
    }
    if spec.legacy {
        return Some(by_ref(item).unwrap_or(Identity::Index(index)));
    }
    Some(Identity::Index(index))
}

fn items_of(vm: &Vm, value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.peek_vec(),
        Value::Null => Vec::new(),
        other => {
            warn!(vm = %vm.id(), value = %other, "repeat source is not a list");
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Compile
// ---------------------------------------------------------------------------

pub(super) fn compile_repeat(
    vm: &Vm,
    node: &Rc<NodeTemplate>,
    spec: &RepeatSpec,
    dest: &Dest,
    meta: &Meta,
) {
    let Some(block) = new_block(vm, dest) else {
        return;
    };
    let ctx = Rc::new(RepeatCtx {
        template: node.clone(),
        spec: spec.clone(),
        meta: Meta {
            repeat_resolved: true,
            ..meta.clone()
        },
        block,
    });

    let on_change = ctx.clone();
    let value = directive::watch(
        vm,
        spec.expr.getter(),
        directive::deferred(
            MutationKind::Repeat,
            Anchor::Block(ctx.block.clone()),
            Rc::new(move |vm: &Vm, value: Value| reconcile(vm, &on_change, &value)),
        ),
    );

    let items: Vec<RepeatItem> = items_of(vm, &value)
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| compile_item(vm, &ctx, item, index))
        .collect();
    ctx.block.set_items(items);
}

/// Compile one item into the block at the current insertion point.
fn compile_item(vm: &Vm, ctx: &RepeatCtx, item: Value, index: usize) -> Option<RepeatItem> {
    let data = ReactiveObject::from_pairs([
        (ctx.spec.key.clone(), Value::from(index)),
        (ctx.spec.value.clone(), item.clone()),
    ]);
    let legacy = ctx.spec.legacy.then(|| ctx.spec.value.clone());
    let scope = create_scope(vm, data, legacy)?;

    let meta = Meta {
        repeat_item: Some(item.clone()),
        ..ctx.meta.clone()
    };
    ctx.block.begin_capture();
    compile(
        &scope,
        &Template::Node(ctx.template.clone()),
        &Dest::Block(ctx.block.clone()),
        &meta,
    );
    let targets = ctx.block.end_capture();
    Some(RepeatItem {
        scope: scope.id(),
        targets,
        data: item,
    })
}

/// Destroy an item's scope, then drop its nodes.
fn discard(app: &App, item: &RepeatItem) {
    if let Some(scope) = app.inner.vm(item.scope) {
        scope.destroy();
    }
    let mut doc = app.inner.doc.borrow_mut();
    for target in &item.targets {
        block::remove(&mut doc, target);
    }
}

// ---------------------------------------------------------------------------
// Reconcile
// ---------------------------------------------------------------------------

fn reconcile(vm: &Vm, ctx: &RepeatCtx, value: &Value) {
    let Some(app) = vm.app() else {
        return;
    };
    let spec = &ctx.spec;
    let next = items_of(vm, value);
    let wanted: FxHashSet<Identity> = next
        .iter()
        .enumerate()
        .filter_map(|(index, item)| identity(spec, item, index))
        .collect();

    // Old items still wanted, and their order.
    let mut reusable: FxHashMap<Identity, RepeatItem> = FxHashMap::default();
    let mut pool: VecDeque<Identity> = VecDeque::new();
    let mut destroyed = 0usize;
    for (index, old) in ctx.block.take_items().into_iter().enumerate() {
        match identity(spec, &old.data, index) {
            Some(id) if wanted.contains(&id) && !reusable.contains_key(&id) => {
                pool.push_back(id.clone());
                reusable.insert(id, old);
            }
            _ => {
                discard(&app, &old);
                destroyed += 1;
            }
        }
    }

    let (mut reused, mut moved, mut created) = (0usize, 0usize, 0usize);
    let mut items = Vec::with_capacity(next.len());
    ctx.block.set_update_mark(Some(ctx.block.start()));
    for (index, item) in next.into_iter().enumerate() {
        let found = identity(spec, &item, index)
            .and_then(|id| reusable.remove(&id).map(|entry| (id, entry)));
        let Some((id, mut entry)) = found else {
            if let Some(entry) = compile_item(vm, ctx, item, index) {
                items.push(entry);
                created += 1;
            }
            continue;
        };

        if pool.front() == Some(&id) {
            pool.pop_front();
        } else {
            pool.retain(|pending| *pending != id);
            if let Some(mark) = ctx.block.update_mark() {
                with_doc(vm, |doc| {
                    entry
                        .targets
                        .iter()
                        .fold(mark, |after, target| block::move_after(doc, target, after))
                });
            }
            moved += 1;
        }
        if let Some(last) = entry.targets.last().map(Target::last) {
            ctx.block.set_update_mark(Some(last));
        }

        if let Some(scope) = app.inner.vm(entry.scope) {
            scope.set(&spec.key, index);
            scope.set(&spec.value, item.clone());
        }
        entry.data = item;
        items.push(entry);
        reused += 1;
    }
    ctx.block.set_update_mark(None);
    ctx.block.set_items(items);

    debug!(
        block = ctx.block.id(),
        reused, moved, created, destroyed, "repeat.reconcile"
    );
}

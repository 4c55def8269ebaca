//! End-to-end checks of the runtime guarantees, driven through an `App`
//! and a recording backend:
//!
//! 1. Batching: N writes in one turn reach a watch callback once
//! 2. Reconciliation identity: a keyed reorder reuses every item
//! 3. Reconciliation removal: removing one keyed item destroys only it
//! 4. Flush ordering: structural handlers run before element handlers
//! 5. Idempotent destroy
//! 6. Lazy watchers and computed properties evaluate on demand
//! 7. Work dropped from a flush does not stop later updates

#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use serde_json::json;
use weave::prelude::*;
use weave::runtime::{Differ, MutationKind, TargetKey, TurnQueue};
use weave_harness::{Fixture, counter_component, list_component, text};

// ── Helpers ──────────────────────────────────────────────────────────

fn keyed_abc() -> Fixture {
    Fixture::boot([list_component(true, &[1, 2, 3])], "list", None).unwrap()
}

fn row(fx: &Fixture, index: usize) -> Value {
    fx.array("rows").unwrap().peek_vec()[index].clone()
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Batching
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn many_writes_in_one_turn_fire_the_watch_once() {
    let fx = Fixture::boot([counter_component()], "counter", None).unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    fx.root
        .watch(Binding::path("count"), move |value| {
            sink.borrow_mut().push(value.to_string());
        })
        .expect("watcher");
    fx.backend.take();

    for n in 1..=10 {
        fx.root.set("count", n);
    }
    assert!(seen.borrow().is_empty(), "callbacks wait for the turn");
    assert_eq!(fx.backend.batch_count(), 0);

    fx.settle();
    assert_eq!(*seen.borrow(), ["10"]);
    assert_eq!(fx.count("updateAttrs"), 1);
    assert_eq!(fx.leaves(), ["10"]);
}

#[test]
fn writes_in_separate_turns_fire_separately() {
    let fx = Fixture::boot([counter_component()], "counter", None).unwrap();
    let hits = Rc::new(Cell::new(0));
    let counter = hits.clone();
    let _watcher = fx
        .root
        .watch(Binding::path("count"), move |_| counter.set(counter.get() + 1));

    fx.root.set("count", 1);
    fx.settle();
    fx.root.set("count", 2);
    fx.settle();
    assert_eq!(hits.get(), 2);
}

#[test]
fn writing_back_the_original_value_still_settles_cleanly() {
    let fx = Fixture::boot([counter_component()], "counter", None).unwrap();
    fx.backend.take();
    fx.root.set("count", 1);
    fx.root.set("count", 0);
    fx.settle();
    assert_eq!(fx.leaves(), ["0"]);
    assert_eq!(fx.count("removeElement"), 0);
}

// ═════════════════════════════════════════════════════════════════════════
// 2-3. Reconciliation
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn keyed_reorder_reuses_every_item() {
    let fx = keyed_abc();
    let mut before = fx.root.child_ids();
    before.sort();
    fx.backend.take();

    let rows = fx.array("rows").unwrap();
    rows.replace(vec![row(&fx, 2), row(&fx, 0), row(&fx, 1)]);
    fx.settle();

    assert_eq!(fx.leaves(), ["3", "1", "2"]);
    let mut after = fx.root.child_ids();
    after.sort();
    assert_eq!(before, after);
    assert_eq!(fx.count("addElement"), 0);
    assert_eq!(fx.count("removeElement"), 0);
}

#[test]
fn keyed_reorder_with_fresh_objects_reuses_by_key() {
    let fx = keyed_abc();
    let before = fx.root.child_ids();
    fx.backend.take();

    fx.root.set(
        "rows",
        Value::from_json(json!([
            {"id": 3, "label": "three"},
            {"id": 1, "label": "one"},
            {"id": 2, "label": "two"},
        ])),
    );
    fx.settle();

    assert_eq!(fx.leaves(), ["three", "one", "two"]);
    for id in before {
        assert!(fx.app.vm(id).is_some());
    }
    assert_eq!(fx.count("addElement"), 0);
    assert_eq!(fx.count("updateAttrs"), 3);
}

#[test]
fn keyed_removal_destroys_exactly_that_item() {
    let fx = keyed_abc();
    let scopes = fx.root.child_ids();
    fx.backend.take();

    fx.array("rows").unwrap().remove_at(1);
    fx.settle();

    assert_eq!(fx.leaves(), ["1", "3"]);
    assert_eq!(fx.root.child_ids(), [scopes[0], scopes[2]]);
    assert!(fx.app.vm(scopes[1]).is_none());
    assert_eq!(fx.count("removeElement"), 1);
    assert_eq!(fx.count("addElement"), 0);
    assert_eq!(fx.count("updateAttrs"), 0);
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Flush ordering
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn repeat_runs_before_shown_at_the_same_depth() {
    let turns = TurnQueue::new();
    let differ = Differ::new(Rc::new(turns.clone()), 100, false);
    let log = Rc::new(RefCell::new(Vec::new()));

    let shown = log.clone();
    differ.append(
        MutationKind::Shown,
        2,
        TargetKey::Block(1),
        Box::new(move || shown.borrow_mut().push("shown")),
    );
    let repeat = log.clone();
    differ.append(
        MutationKind::Repeat,
        2,
        TargetKey::Block(2),
        Box::new(move || repeat.borrow_mut().push("repeat")),
    );

    turns.run_pending();
    assert_eq!(*log.borrow(), ["repeat", "shown"]);
}

#[test]
fn hiding_a_block_skips_updates_queued_for_its_content() {
    let def = ComponentDef::builder("panel")
        .data(json!({"show": true, "msg": "a"}))
        .template(NodeTemplate::new("div").child(text(Binding::path("msg")).shown(Binding::path("show"))))
        .build();
    let fx = Fixture::boot([def], "panel", None).unwrap();
    assert_eq!(fx.leaves(), ["a"]);
    fx.backend.take();

    fx.root.set("msg", "b");
    fx.root.set("show", false);
    fx.settle();

    assert!(fx.leaves().is_empty());
    assert_eq!(fx.count("removeElement"), 1);
    assert_eq!(fx.count("updateAttrs"), 0);

    fx.root.set("show", true);
    fx.settle();
    assert_eq!(fx.leaves(), ["b"]);
}

#[test]
fn parent_list_changes_land_before_child_updates() {
    let fx = keyed_abc();
    fx.backend.take();

    // Rename the first row and drop the last one in the same turn.
    let first = row(&fx, 0);
    weave::reactive::set(&first, "label", "uno");
    fx.array("rows").unwrap().pop();
    fx.settle();

    assert_eq!(fx.leaves(), ["uno", "2"]);
    let actions = fx.drain_actions();
    let removed = actions.iter().position(|a| *a == "removeElement");
    let updated = actions.iter().position(|a| *a == "updateAttrs");
    assert!(removed < updated, "{actions:?}");
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Idempotent destroy
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn destroying_twice_is_a_no_op() {
    let fx = keyed_abc();
    let rows_dep = fx.root.data().property_dep("rows").unwrap();
    let hits = Rc::new(Cell::new(0));
    let counter = hits.clone();
    fx.root.on("hook:destroyed", move |_, _| counter.set(counter.get() + 1));

    fx.root.destroy();
    fx.root.destroy();

    assert_eq!(hits.get(), 1);
    assert_eq!(rows_dep.subscriber_count(), 0);
    assert_eq!(fx.root.watcher_count(), 0);
    assert!(fx.root.is_destroyed());
}

#[test]
fn destroying_the_app_twice_is_a_no_op() {
    let fx = keyed_abc();
    fx.app.destroy();
    fx.app.destroy();
    assert!(fx.app.is_destroyed());
    assert_eq!(fx.app.vm_count(), 0);
    assert_eq!(fx.app.tick(), 0);
    assert!(matches!(fx.app.refresh(json!({})), Err(RuntimeError::InstanceDestroyed)));
}

#[test]
fn writes_after_destroy_reach_nobody() {
    let fx = Fixture::boot([counter_component()], "counter", None).unwrap();
    let data = fx.root.data().clone();
    fx.root.destroy();
    fx.backend.take();

    data.set("count", 42);
    fx.settle();
    assert_eq!(fx.backend.batch_count(), 0);
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Lazy evaluation
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn lazy_watcher_runs_once_until_invalidated() {
    let data = Value::from_json(json!({"n": 2}));
    weave::reactive::observe(&data, None);
    let dd = data.clone();
    let w = Watcher::lazy(move || Value::Number(dd.get("n").as_f64().unwrap_or(0.0) * 10.0));

    assert!(w.is_dirty());
    assert_eq!(w.evaluations(), 0);
    assert_eq!(w.evaluate().as_f64(), Some(20.0));
    assert!(!w.is_dirty());
    assert_eq!(w.evaluate().as_f64(), Some(20.0));
    assert_eq!(w.evaluations(), 1);

    data.as_object().unwrap().set("n", 3);
    assert!(w.is_dirty());
    assert_eq!(w.evaluations(), 1);
    assert_eq!(w.evaluate().as_f64(), Some(30.0));
    assert_eq!(w.evaluations(), 2);
}

#[test]
fn computed_properties_recompute_only_after_a_change() {
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let def = ComponentDef::builder("calc")
        .data(json!({"n": 2}))
        .computed("double", move |vm: &Vm| {
            counter.set(counter.get() + 1);
            Value::Number(vm.get("n").as_f64().unwrap_or(0.0) * 2.0)
        })
        .template(NodeTemplate::new("div").child(text(Binding::path("double"))))
        .build();
    let fx = Fixture::boot([def], "calc", None).unwrap();
    assert_eq!(fx.leaves(), ["4"]);
    let after_boot = runs.get();

    assert_eq!(fx.root.get("double").as_f64(), Some(4.0));
    assert_eq!(fx.root.get("double").as_f64(), Some(4.0));
    assert_eq!(runs.get(), after_boot);

    fx.root.set("n", 5);
    fx.settle();
    assert_eq!(fx.leaves(), ["10"]);
    assert_eq!(runs.get(), after_boot + 1);
}

// ═════════════════════════════════════════════════════════════════════════
// 7. Dropped work
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn a_failing_watch_does_not_silence_later_ones() {
    let fx = Fixture::boot([counter_component()], "counter", None).unwrap();
    let failed = Rc::new(Cell::new(false));
    let flag = failed.clone();
    let _first = fx.root.watch(Binding::path("count"), move |_| {
        if !flag.replace(true) {
            panic!("watch callback failed");
        }
    });
    let hits = Rc::new(Cell::new(0));
    let counter = hits.clone();
    let _second = fx
        .root
        .watch(Binding::path("count"), move |_| counter.set(counter.get() + 1));

    fx.root.set("count", 1);
    assert!(catch_unwind(AssertUnwindSafe(|| fx.settle())).is_err());
    assert!(failed.get());
    assert_eq!(hits.get(), 0, "the rest of the failed pass is dropped");

    for n in 2..=4 {
        fx.root.set("count", n);
        fx.settle();
    }
    assert_eq!(hits.get(), 3);
    assert_eq!(fx.leaves(), ["4"]);
}

#[test]
fn bindings_reschedule_after_the_differ_is_cleared() {
    let fx = Fixture::boot([counter_component()], "counter", None).unwrap();
    fx.root.set("count", 1);
    fx.app.differ().clear();
    fx.settle();
    assert_eq!(fx.leaves(), ["0"]);

    fx.root.set("count", 2);
    fx.settle();
    assert_eq!(fx.leaves(), ["2"]);
}

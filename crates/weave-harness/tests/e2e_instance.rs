//! End-to-end tests of the instance surface: bootstrap, host events,
//! refresh, nested component lifecycles and component events.

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use weave::prelude::*;
use weave_harness::{Fixture, counter_component, text};

// ── Helpers ──────────────────────────────────────────────────────────

type Log = Rc<RefCell<Vec<String>>>;

fn logged(name: &str, log: &Log) -> weave::runtime::ComponentBuilder {
    let mut builder = ComponentDef::builder(name);
    for kind in [HookKind::Init, HookKind::Created, HookKind::Ready, HookKind::Destroyed] {
        let log = log.clone();
        let name = name.to_string();
        builder = builder.hook(kind, move |_| {
            log.borrow_mut().push(format!("{name}:{}", kind.event()));
        });
    }
    builder
}

fn label_ref(fx: &Fixture) -> u64 {
    let el = fx.root.el("label").expect("label element");
    fx.app.document().node_ref(el).expect("attached label")
}

// ═════════════════════════════════════════════════════════════════════════
// Bootstrap and host calls
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn bootstrap_delivers_one_create_batch() {
    let fx = Fixture::boot([counter_component()], "counter", Some(json!({"count": 7}))).unwrap();
    assert_eq!(fx.outline(), "document{div{text(7)}}");
    assert_eq!(fx.backend.batch_count(), 1);
    let actions = fx.drain_actions();
    assert_eq!(actions.first(), Some(&"createBody"));
    assert_eq!(actions.last(), Some(&"createFinish"));
}

#[test]
fn host_events_run_methods_and_flush_before_update_finish() {
    let fx = Fixture::boot([counter_component()], "counter", None).unwrap();
    let node = label_ref(&fx);
    fx.backend.take();

    fx.app.fire_event_by_ref(node, "click", json!({})).unwrap();
    fx.app.fire_event_by_ref(node, "click", json!({})).unwrap();

    assert_eq!(fx.leaves(), ["2"]);
    assert_eq!(
        fx.drain_actions(),
        ["updateAttrs", "updateFinish", "updateAttrs", "updateFinish"]
    );
}

#[test]
fn host_events_to_unknown_targets_fail() {
    let fx = Fixture::boot([counter_component()], "counter", None).unwrap();
    let node = label_ref(&fx);
    assert!(matches!(
        fx.app.fire_event_by_ref(node, "swipe", json!(null)),
        Err(RuntimeError::NoHandler { .. })
    ));
    assert!(matches!(
        fx.app.fire_event_by_ref(u64::MAX, "click", json!(null)),
        Err(RuntimeError::UnknownRef(_))
    ));
}

#[test]
fn refresh_writes_root_data_and_finishes() {
    let fx = Fixture::boot([counter_component()], "counter", None).unwrap();
    fx.backend.take();

    fx.app.refresh(json!({"count": 3})).unwrap();

    assert_eq!(fx.leaves(), ["3"]);
    assert_eq!(fx.drain_actions(), ["updateAttrs", "refreshFinish"]);
}

#[test]
fn nothing_is_delivered_after_destroy() {
    let fx = Fixture::boot([counter_component()], "counter", None).unwrap();
    fx.root.set("count", 1);
    fx.app.destroy();
    fx.backend.take();

    assert_eq!(fx.settle(), 0);
    fx.app.flush();
    assert_eq!(fx.backend.batch_count(), 0);
    assert!(fx.app.root_vm().is_none());
}

// ═════════════════════════════════════════════════════════════════════════
// Nested lifecycles
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn children_are_ready_before_their_parent() {
    let log: Log = Rc::default();
    let child = logged("child", &log)
        .template(NodeTemplate::new("div").child(text(json!("leaf"))))
        .build();
    let parent = logged("parent", &log)
        .template(NodeTemplate::new("div").child(NodeTemplate::new("child")))
        .build();
    let fx = Fixture::boot([child, parent], "parent", None).unwrap();

    assert_eq!(
        *log.borrow(),
        [
            "parent:hook:init",
            "parent:hook:created",
            "child:hook:init",
            "child:hook:created",
            "child:hook:ready",
            "parent:hook:ready",
        ]
    );

    log.borrow_mut().clear();
    fx.app.destroy();
    assert_eq!(*log.borrow(), ["child:hook:destroyed", "parent:hook:destroyed"]);
}

#[test]
fn hidden_children_are_destroyed_with_their_block() {
    let log: Log = Rc::default();
    let child = logged("child", &log)
        .template(NodeTemplate::new("div").child(text(json!("leaf"))))
        .build();
    let parent = ComponentDef::builder("parent")
        .data(json!({"open": true}))
        .template(
            NodeTemplate::new("div").child(NodeTemplate::new("child").shown(Binding::path("open"))),
        )
        .build();
    let fx = Fixture::boot([child, parent], "parent", None).unwrap();
    assert_eq!(fx.leaves(), ["leaf"]);
    log.borrow_mut().clear();

    fx.root.set("open", false);
    fx.settle();
    assert_eq!(*log.borrow(), ["child:hook:destroyed"]);
    assert!(fx.leaves().is_empty());

    fx.root.set("open", true);
    fx.settle();
    assert_eq!(fx.leaves(), ["leaf"]);
    assert_eq!(
        log.borrow().iter().filter(|e| e.ends_with("ready")).count(),
        1
    );
}

// ═════════════════════════════════════════════════════════════════════════
// Component events and props
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn child_events_call_creator_methods() {
    let child = ComponentDef::builder("picker")
        .props(["choice"])
        .template(NodeTemplate::new("div").child(text(Binding::path("choice"))))
        .build();
    let parent = ComponentDef::builder("form")
        .data(json!({"picked": "", "current": "red"}))
        .method("onPick", |vm: &Vm, args: &[Value]| {
            vm.set("picked", args.first().cloned().unwrap_or_default());
            Value::Null
        })
        .template(
            NodeTemplate::new("div")
                .child(
                    NodeTemplate::new("picker")
                        .id(json!("picker"))
                        .attr("choice", Binding::path("current"))
                        .on("pick", "onPick"),
                )
                .child(text(Binding::path("picked"))),
        )
        .build();
    let fx = Fixture::boot([child, parent], "form", None).unwrap();
    assert_eq!(fx.leaves(), ["red", ""]);

    let picker = fx.root.vm_by_id("picker").expect("picker");
    picker.emit("pick", Value::from("blue"));
    fx.settle();
    assert_eq!(fx.leaves(), ["red", "blue"]);

    fx.root.set("current", "green");
    fx.settle();
    assert_eq!(picker.get("choice").as_str(), Some("green"));
    assert_eq!(fx.leaves(), ["green", "blue"]);
}

#[test]
fn dispatch_bubbles_until_stopped() {
    let seen: Log = Rc::default();
    let inner = ComponentDef::builder("inner")
        .template(NodeTemplate::new("div").child(text(json!("x"))))
        .build();
    let outer = ComponentDef::builder("outer")
        .template(NodeTemplate::new("div").child(NodeTemplate::new("inner").id(json!("inner"))))
        .build();
    let fx = Fixture::boot([inner, outer], "outer", None).unwrap();

    let sink = seen.clone();
    fx.root.on("ping", move |vm, evt| {
        sink.borrow_mut().push(format!("{}:{}", vm.component_name().unwrap_or("?"), evt.detail()));
    });
    let inner = fx.root.vm_by_id("inner").expect("inner");
    let evt = inner.dispatch("ping", Value::from(1));
    assert!(!evt.is_stopped());
    assert_eq!(*seen.borrow(), ["outer:1"]);

    inner.on("ping", |_, evt| evt.stop());
    inner.dispatch("ping", Value::from(2));
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn static_subtrees_ignore_later_writes() {
    let def = ComponentDef::builder("banner")
        .data(json!({"title": "v1"}))
        .template(
            NodeTemplate::new("div")
                .static_bindings()
                .child(text(Binding::path("title"))),
        )
        .build();
    let fx = Fixture::boot([def], "banner", None).unwrap();
    assert_eq!(fx.root.watcher_count(), 0);
    fx.backend.take();

    fx.root.set("title", "v2");
    fx.settle();
    assert_eq!(fx.leaves(), ["v1"]);
    assert_eq!(fx.backend.batch_count(), 0);
}

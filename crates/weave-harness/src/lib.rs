#![forbid(unsafe_code)]

//! Test harness and reference fixtures for Weave.
//!
//! A [`Fixture`] is one booted instance wired to a [`RecordingBackend`], so
//! tests can drive writes and turns and then inspect both the document and
//! the mutation log the host would have received.
//!
//! # Invariants
//!
//! 1. [`Fixture::boot`] returns only after the initial `createFinish` batch
//!    has been delivered.
//! 2. [`Fixture::settle`] runs turns until the turn queue is empty, so the
//!    document reflects every write made before the call.
//!
//! # Failure Modes
//!
//! - **Self-rescheduling components**: [`Fixture::settle`] stops after
//!   [`MAX_SETTLE_TURNS`] turns and reports how many ran.

use std::rc::Rc;

use serde_json::json;
use tracing::debug;
use weave::prelude::*;
use weave::runtime::Result;

/// Upper bound on turns one [`Fixture::settle`] call runs.
pub const MAX_SETTLE_TURNS: usize = 64;

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// A booted instance and its recorded output.
pub struct Fixture {
    pub app: App,
    pub root: Vm,
    pub backend: RecordingBackend,
}

impl Fixture {
    /// Register `defs` and bootstrap the component named `root`.
    pub fn boot(
        defs: impl IntoIterator<Item = Rc<ComponentDef>>,
        root: &str,
        data: Option<serde_json::Value>,
    ) -> Result<Self> {
        Self::boot_with(RuntimeConfig::default(), defs, root, data)
    }

    pub fn boot_with(
        config: RuntimeConfig,
        defs: impl IntoIterator<Item = Rc<ComponentDef>>,
        root: &str,
        data: Option<serde_json::Value>,
    ) -> Result<Self> {
        let backend = RecordingBackend::new();
        let app = App::new("harness", config, backend.clone());
        for def in defs {
            app.register_component(def);
        }
        let root = app.bootstrap(root, data)?;
        debug!(vms = app.vm_count(), "harness.boot");
        Ok(Self { app, root, backend })
    }

    /// Run turns until nothing is queued. Returns the number of turns run.
    pub fn settle(&self) -> usize {
        let mut turns = 0;
        while turns < MAX_SETTLE_TURNS && self.app.tick() > 0 {
            turns += 1;
        }
        turns
    }

    /// Outline of the whole document, see [`weave::dom::Document::describe`].
    #[must_use]
    pub fn outline(&self) -> String {
        let doc = self.app.document();
        doc.describe(doc.root())
    }

    /// Leaf values in document order.
    #[must_use]
    pub fn leaves(&self) -> Vec<String> {
        let doc = self.app.document();
        doc.leaf_values(doc.root())
    }

    /// Delivered mutations with the given action name.
    #[must_use]
    pub fn count(&self, action: &str) -> usize {
        self.backend.count(action)
    }

    /// Action names of everything delivered since the last call.
    pub fn drain_actions(&self) -> Vec<&'static str> {
        self.backend
            .take()
            .iter()
            .flatten()
            .map(Mutation::action)
            .collect()
    }

    /// The observable array stored under `key` on the root view-model.
    #[must_use]
    pub fn array(&self, key: &str) -> Option<ObservableArray> {
        self.root.get(key).as_array().cloned()
    }
}

impl std::fmt::Debug for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixture")
            .field("app", &self.app)
            .field("batches", &self.backend.batch_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Reference components
// ---------------------------------------------------------------------------

/// Leaf element showing `value`.
#[must_use]
pub fn text(value: impl Into<Binding>) -> NodeTemplate {
    NodeTemplate::new("text").attr("value", value)
}

/// Items `{id, label}` with labels equal to their ids.
#[must_use]
pub fn rows(ids: &[u32]) -> serde_json::Value {
    serde_json::Value::Array(
        ids.iter()
            .map(|id| json!({ "id": id, "label": id.to_string() }))
            .collect(),
    )
}

/// `list`: one text leaf per entry of `rows`, labelled by `row.label`,
/// identified by `id` when `keyed`.
#[must_use]
pub fn list_component(keyed: bool, ids: &[u32]) -> Rc<ComponentDef> {
    let mut spec = RepeatSpec::new(Binding::path("rows")).value("row");
    if keyed {
        spec = spec.track_by("id");
    }
    ComponentDef::builder("list")
        .data(json!({ "rows": rows(ids) }))
        .template(
            NodeTemplate::new("div").child(text(Binding::path("row.label")).repeat(spec)),
        )
        .build()
}

/// `counter`: a clickable leaf showing `count`, and an `increment` method.
#[must_use]
pub fn counter_component() -> Rc<ComponentDef> {
    ComponentDef::builder("counter")
        .data(json!({ "count": 0 }))
        .method("increment", |vm: &Vm, _args: &[Value]| {
            let next = vm.get("count").as_f64().unwrap_or(0.0) + 1.0;
            vm.set("count", next);
            Value::Null
        })
        .template(
            NodeTemplate::new("div")
                .child(text(Binding::path("count")).id(json!("label")).on("click", "increment")),
        )
        .build()
}

#![forbid(unsafe_code)]

//! Weave public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use weave_dom as dom;
pub use weave_reactive as reactive;
pub use weave_runtime as runtime;

pub mod prelude {
    pub use weave_dom::{Mutation, NodeId, NullBackend, RecordingBackend, RenderBackend};
    pub use weave_reactive::{ObservableArray, ReactiveObject, Value, Watcher, delete, set};
    pub use weave_runtime::{
        App, Binding, ComponentDef, Evt, HookKind, NodeTemplate, RepeatSpec, RuntimeConfig,
        RuntimeError, Template, Vm,
    };
}

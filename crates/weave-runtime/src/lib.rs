#![forbid(unsafe_code)]

//! View-models, template compiler and mutation scheduling for Weave.
//!
//! # Architecture
//!
//! ```text
//! App ── Document ── RenderBackend
//!  │        ▲
//!  │        │ deferred handlers
//!  ├── Differ ◄── directive watchers ◄── Vm (data, computed, watchers)
//!  │                                     │
//!  └── arena of Vm ◄─────────────────────┘ compiler (templates → nodes/blocks)
//! ```
//!
//! A component [`Vm`] is compiled from its [`ComponentDef`]'s [`Template`].
//! Every reactive binding becomes one watcher owned by the view-model it
//! reads from; its callback records the latest value and appends a handler
//! to the [`Differ`], which applies the change on the next turn in depth
//! order. The [`App`] drives turns and delivers the resulting document
//! mutations to the backend.
//!
//! # Invariants
//!
//! 1. Watcher callbacks never edit the document directly.
//! 2. Within one flush pass, shallower targets are updated before deeper
//!    ones, and structural (repeat, shown) updates before element updates.
//! 3. Destroying a view-model tears its watchers down before its children.

pub mod app;
pub mod compiler;
pub mod component;
pub mod config;
pub mod differ;
pub mod error;
pub mod template;
pub mod turn;
pub mod vm;

pub use app::App;
pub use compiler::{FragmentBlock, Target};
pub use component::{ComponentBuilder, ComponentDef, ComputedDef, HookKind};
pub use config::RuntimeConfig;
pub use differ::{Differ, MutationKind, TargetKey};
pub use error::{Result, RuntimeError};
pub use template::{AppendMode, Binding, EventSpec, NodeTemplate, RepeatSpec, Template, TypeSpec};
pub use turn::{TurnQueue, TurnScheduler};
pub use vm::{Evt, LifecycleState, ListenerId, Vm, VmId, VmKind, WeakVm};

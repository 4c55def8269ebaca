#![forbid(unsafe_code)]

//! Virtual document for the Weave view runtime.
//!
//! The runtime never talks to a platform view system directly. It edits a
//! [`Document`], an arena of nodes addressed by generational [`NodeId`]
//! handles, and the document records every visible change as a [`Mutation`].
//! Batches of mutations are handed to a [`RenderBackend`].
//!
//! # Node kinds
//!
//! [`NodeKind`] is a closed set: native containers, composite containers
//! (delivered to the backend as one whole subtree), leaves (whose child
//! operations are no-ops) and comments (anchors, invisible to the backend).
//! Child management goes through the [`ChildHost`] capability.
//!
//! # Invariants
//!
//! 1. A stale handle (removed node, reused slot) is rejected, never aliased.
//! 2. Only nodes attached under the document root produce mutations.
//! 3. Comment nodes never appear in mutations and do not count towards
//!    child indices reported to the backend.

pub mod backend;
pub mod document;
pub mod error;
pub mod id;
pub mod mutation;
pub mod node;

pub use backend::{NullBackend, RecordingBackend, RenderBackend};
pub use document::Document;
pub use error::DomError;
pub use id::NodeId;
pub use mutation::{Mutation, NodeSnapshot};
pub use node::{ChildHost, Element, EventHandler, NodeKind, Role};

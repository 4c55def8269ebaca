#![forbid(unsafe_code)]

use thiserror::Error;
use weave_dom::{DomError, NodeId};

/// Errors of the instance surface.
///
/// The reactive layer itself reports nothing structured: bad paths and
/// operations on destroyed view-models are logged and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("unknown component type `{0}`")]
    UnknownComponent(String),

    #[error("instance has been destroyed")]
    InstanceDestroyed,

    #[error("instance is already bootstrapped")]
    AlreadyBootstrapped,

    #[error("instance is not bootstrapped")]
    NotBootstrapped,

    #[error("node {0:?} no longer exists")]
    StaleNode(NodeId),

    #[error("no node with reference {0}")]
    UnknownRef(u64),

    #[error("no `{event}` handler bound on {node:?}")]
    NoHandler { node: NodeId, event: String },

    #[error(transparent)]
    Dom(#[from] DomError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

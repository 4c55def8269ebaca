#![forbid(unsafe_code)]

use thiserror::Error;

use crate::id::NodeId;

/// Errors from document edits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("stale node handle {0:?}")]
    StaleNode(NodeId),

    #[error("{child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("{0:?} has no parent to insert relative to")]
    Detached(NodeId),

    #[error("inserting {child:?} under {parent:?} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },

    #[error("the document root cannot be moved or removed")]
    RootImmutable,
}

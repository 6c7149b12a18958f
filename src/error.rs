//! Errors surfaced by the transition tree API.
//!
//! Phase mismatches are never errors: the machine ignores events that do not
//! apply. Only misuse of tree membership is reported.

use crate::machine::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// The id does not refer to a live node.
    #[error("unknown transition node {0}")]
    UnknownNode(NodeId),
    /// The child must be detached from its current parent first.
    #[error("node {child} already belongs to {parent}")]
    AlreadyAttached { child: NodeId, parent: NodeId },
    /// The parent is the child itself or one of its descendants.
    #[error("attaching {child} under {parent} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },
}

//! Tree node representation and its state machine.

use serde::{Deserialize, Serialize};

use crate::evaluate::{SplitPredicate, SubsetRef};
use crate::tree::NodeId;

/// Node state errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    /// A terminal node was asked to transition again. This guards
    /// against double-expansion when a crash-recovery replay
    /// re-processes a phase.
    #[error("invalid transition on node {id}: cannot mark {attempted} from state {current}")]
    InvalidTransition {
        id: NodeId,
        current: &'static str,
        attempted: &'static str,
    },
}

/// Resolution state of a node.
///
/// A node is created `Unknown` and transitions exactly once to `Leaf`
/// or `Split`; it never reverts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeState {
    /// Data subset known, split not yet computed.
    Unknown,
    /// Terminal node carrying a prediction value.
    Leaf { prediction: f64 },
    /// Internal node carrying the chosen predicate and its two children.
    Split {
        predicate: SplitPredicate,
        left: NodeId,
        right: NodeId,
    },
}

impl NodeState {
    fn name(&self) -> &'static str {
        match self {
            NodeState::Unknown => "unknown",
            NodeState::Leaf { .. } => "leaf",
            NodeState::Split { .. } => "split",
        }
    }
}

/// A node in the (partially built) decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    subset: SubsetRef,
    state: NodeState,
}

impl Node {
    /// Create a new `Unknown` node for the given data subset.
    pub fn unknown(id: NodeId, subset: SubsetRef) -> Self {
        Self {
            id,
            subset,
            state: NodeState::Unknown,
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.id.depth()
    }

    #[inline]
    pub fn subset(&self) -> &SubsetRef {
        &self.subset
    }

    #[inline]
    pub fn state(&self) -> &NodeState {
        &self.state
    }

    #[inline]
    pub fn is_unknown(&self) -> bool {
        matches!(self.state, NodeState::Unknown)
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.state, NodeState::Leaf { .. })
    }

    #[inline]
    pub fn is_split(&self) -> bool {
        matches!(self.state, NodeState::Split { .. })
    }

    /// Returns true if the node is `Leaf` or `Split` (no longer on the
    /// frontier).
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !self.is_unknown()
    }

    /// Get the prediction value, if this is a leaf.
    pub fn prediction(&self) -> Option<f64> {
        match self.state {
            NodeState::Leaf { prediction } => Some(prediction),
            _ => None,
        }
    }

    /// Get the split predicate, if this is a split node.
    pub fn predicate(&self) -> Option<&SplitPredicate> {
        match &self.state {
            NodeState::Split { predicate, .. } => Some(predicate),
            _ => None,
        }
    }

    /// Get child identities, if this is a split node.
    pub fn children(&self) -> Option<(NodeId, NodeId)> {
        match self.state {
            NodeState::Split { left, right, .. } => Some((left, right)),
            _ => None,
        }
    }

    /// Resolve this node into a leaf. One-shot: fails on any node that
    /// is no longer `Unknown`.
    pub fn mark_leaf(&mut self, prediction: f64) -> Result<(), TreeError> {
        self.transition("leaf", NodeState::Leaf { prediction })
    }

    /// Resolve this node into a split owning two child identities.
    /// One-shot: fails on any node that is no longer `Unknown`.
    pub fn mark_split(
        &mut self,
        predicate: SplitPredicate,
        left: NodeId,
        right: NodeId,
    ) -> Result<(), TreeError> {
        debug_assert_eq!(
            (left, right),
            self.id.children(),
            "split children must be this node's own children"
        );
        self.transition(
            "split",
            NodeState::Split {
                predicate,
                left,
                right,
            },
        )
    }

    fn transition(&mut self, attempted: &'static str, next: NodeState) -> Result<(), TreeError> {
        match self.state {
            NodeState::Unknown => {
                self.state = next;
                Ok(())
            }
            _ => Err(TreeError::InvalidTransition {
                id: self.id,
                current: self.state.name(),
                attempted,
            }),
        }
    }
}

//! Assembled tree snapshots.
//!
//! A [`Tree`] is the full persisted structure read back from the store:
//! every node reachable from the root via split edges, plus any
//! still-unresolved frontier nodes. Nodes iterate in breadth-first
//! order (the natural order of [`NodeId`]).

use std::collections::{BTreeMap, HashSet};

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::tree::{Node, NodeId, NodeState};

/// Structural validation errors for [`Tree`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeValidationError {
    #[error("tree has no nodes")]
    EmptyTree,

    #[error("tree has nodes but no root")]
    MissingRoot,

    #[error("split node {parent} references missing child {child}")]
    DanglingChild { parent: NodeId, child: NodeId },

    #[error("node {id} is not reachable from the root")]
    UnreachableNode { id: NodeId },

    #[error("node {id} is still unresolved")]
    UnresolvedNode { id: NodeId },
}

/// The set of all persisted nodes, keyed by identity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tree {
    nodes: BTreeMap<NodeId, Node>,
}

impl Tree {
    /// Assemble a tree from a bag of nodes. Later duplicates of the
    /// same identity win.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id(), n)).collect(),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn root(&self) -> Option<&Node> {
        self.nodes.get(&NodeId::root())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in breadth-first order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Still-unresolved nodes in breadth-first order. After a crash
    /// these are exactly the frontier of the last committed phase.
    pub fn unknown(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.is_unknown())
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.values().filter(|n| n.is_leaf()).count()
    }

    pub fn num_splits(&self) -> usize {
        self.nodes.values().filter(|n| n.is_split()).count()
    }

    /// Depth of the deepest node; 0 for a root-only tree.
    pub fn max_depth(&self) -> u32 {
        self.nodes.keys().map(|id| id.depth()).max().unwrap_or(0)
    }

    /// True when the tree is non-empty and no node is unresolved.
    pub fn is_complete(&self) -> bool {
        !self.is_empty() && self.unknown().next().is_none()
    }

    /// Validate a completed tree: a root exists, every split's children
    /// are present, every node is reachable, and nothing is unresolved.
    pub fn validate(&self) -> Result<(), TreeValidationError> {
        if self.is_empty() {
            return Err(TreeValidationError::EmptyTree);
        }
        let root = self
            .root()
            .ok_or(TreeValidationError::MissingRoot)?;

        let mut visited: HashSet<NodeId> = HashSet::with_capacity(self.len());
        let mut stack = vec![root.id()];
        while let Some(id) = stack.pop() {
            let node = self
                .get(id)
                .ok_or_else(|| TreeValidationError::DanglingChild {
                    parent: id.parent().unwrap_or_else(NodeId::root),
                    child: id,
                })?;
            visited.insert(id);
            if let NodeState::Unknown = node.state() {
                return Err(TreeValidationError::UnresolvedNode { id });
            }
            if let Some((left, right)) = node.children() {
                for child in [left, right] {
                    if self.get(child).is_none() {
                        return Err(TreeValidationError::DanglingChild {
                            parent: id,
                            child,
                        });
                    }
                    stack.push(child);
                }
            }
        }

        if visited.len() != self.len() {
            let unreachable = self
                .nodes
                .keys()
                .find(|id| !visited.contains(id))
                .copied()
                .ok_or(TreeValidationError::EmptyTree)?;
            return Err(TreeValidationError::UnreachableNode { id: unreachable });
        }
        Ok(())
    }

    /// Predict a value for one row by walking split predicates from the
    /// root. Returns `None` if the walk reaches an unresolved node, a
    /// missing child, or a feature index outside the row.
    pub fn predict(&self, row: &[f32]) -> Option<f64> {
        let mut node = self.root()?;
        loop {
            match node.state() {
                NodeState::Leaf { prediction } => return Some(*prediction),
                NodeState::Unknown => return None,
                NodeState::Split {
                    predicate,
                    left,
                    right,
                } => {
                    let value = *row.get(predicate.feature as usize)?;
                    let next = if predicate.go_left(value) { *left } else { *right };
                    node = self.get(next)?;
                }
            }
        }
    }
}

// Serialized as a flat node list; BTreeMap keys are not JSON-friendly
// and the id is already carried by each node.
impl Serialize for Tree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Doc<'a> {
            nodes: Vec<&'a Node>,
        }
        Doc {
            nodes: self.nodes.values().collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Tree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Doc {
            nodes: Vec<Node>,
        }
        let doc = Doc::deserialize(deserializer)?;
        Ok(Tree::from_nodes(doc.nodes))
    }
}

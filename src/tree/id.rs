//! Stable node identity.
//!
//! A [`NodeId`] records the path from the root as a bit sequence: bit `i`
//! of `path` is the edge direction taken at depth `i` (0 = left,
//! 1 = right). The identity is stable across processes, two distinct
//! nodes never collide, and ancestry is derivable from the identity
//! alone — which is what lets the tree store key nodes durably and the
//! scheduler resume from a snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum tree depth representable by a [`NodeId`] (bit width of the
/// path). Nodes at this depth can never be split.
pub const MAX_DEPTH: u32 = 64;

/// Identity of a tree node: the path taken from the root.
///
/// Ordering is depth-major, then path — i.e. breadth-first order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    depth: u32,
    path: u64,
}

impl NodeId {
    /// The root identity (depth 0, empty path).
    pub const fn root() -> Self {
        Self { depth: 0, path: 0 }
    }

    /// Depth of this node; the root has depth 0.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Identity of the left child.
    ///
    /// # Panics
    /// Panics if this node is at [`MAX_DEPTH`].
    #[inline]
    pub fn left_child(&self) -> NodeId {
        assert!(self.depth < MAX_DEPTH, "node id path bits exhausted");
        NodeId {
            depth: self.depth + 1,
            path: self.path,
        }
    }

    /// Identity of the right child.
    ///
    /// # Panics
    /// Panics if this node is at [`MAX_DEPTH`].
    #[inline]
    pub fn right_child(&self) -> NodeId {
        assert!(self.depth < MAX_DEPTH, "node id path bits exhausted");
        NodeId {
            depth: self.depth + 1,
            path: self.path | (1u64 << self.depth),
        }
    }

    /// Both child identities, left then right.
    #[inline]
    pub fn children(&self) -> (NodeId, NodeId) {
        (self.left_child(), self.right_child())
    }

    /// Identity of the parent, or `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        if self.depth == 0 {
            return None;
        }
        let depth = self.depth - 1;
        let mask = (1u64 << depth) - 1;
        Some(NodeId {
            depth,
            path: self.path & mask,
        })
    }

    /// Returns true if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &NodeId) -> bool {
        if self.depth >= other.depth {
            return false;
        }
        let mask = if self.depth == 0 {
            0
        } else {
            (1u64 << self.depth) - 1
        };
        (other.path & mask) == self.path
    }

    /// Store key encoding: depth-major big-endian bytes, so the
    /// persisted key order matches breadth-first order.
    pub(crate) fn to_key(self) -> [u8; 12] {
        let mut key = [0u8; 12];
        key[..4].copy_from_slice(&self.depth.to_be_bytes());
        key[4..].copy_from_slice(&self.path.to_be_bytes());
        key
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.depth == 0 {
            return write!(f, "root");
        }
        for i in 0..self.depth {
            let edge = if self.path & (1u64 << i) == 0 { 'L' } else { 'R' };
            write!(f, "{edge}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

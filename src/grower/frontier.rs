//! The frontier of unresolved nodes.

use std::collections::VecDeque;

use crate::tree::Node;

/// FIFO queue of `Unknown` nodes awaiting expansion, owned exclusively
/// by the scheduler.
///
/// FIFO order gives breadth-first growth: a parent's cohort fully
/// resolves before any grandchild is considered, because children
/// enqueued while a phase runs are only drained by the next phase.
#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<Node>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an unresolved node for a later phase.
    pub fn push(&mut self, node: Node) {
        debug_assert!(node.is_unknown(), "only unresolved nodes belong on the frontier");
        self.queue.push_back(node);
    }

    /// Take a snapshot of the current contents, emptying the frontier.
    /// Nodes pushed afterwards belong to the next phase.
    pub fn drain_phase(&mut self) -> Vec<Node> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

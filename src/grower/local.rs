//! In-memory subtree construction.
//!
//! Once a node's subset drops below the routing threshold, its whole
//! subtree is resolved inside this process: children are expanded
//! recursively regardless of their own size and never re-enter the
//! distributed frontier.
//!
//! The builder writes nothing itself. It returns the fully resolved
//! node batch and the scheduler commits it with the rest of the phase,
//! so an abandoned build leaves no partial state behind.

use crate::evaluate::{Decision, SplitEvaluator};
use crate::tree::{Node, NodeId, TreeError};

/// Hard safety bound on local recursion depth, independent of the
/// configured height. A subset small enough to route in-memory cannot
/// legitimately need 2^32 rows' worth of splits; hitting this bound
/// means the evaluator keeps splitting a subset it cannot partition.
pub const MAX_LOCAL_DEPTH: u32 = 32;

/// In-memory build errors.
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    /// Recursion exceeded [`MAX_LOCAL_DEPTH`]. The scheduler absorbs
    /// this by committing the entry node as a forced fallback leaf.
    #[error("local recursion bound exceeded at node {id} ({local_depth} levels below entry)")]
    CapacityExceeded { id: NodeId, local_depth: u32 },

    #[error(transparent)]
    Eval(#[from] crate::evaluate::EvalError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Recursively expands a subtree entirely within one process.
pub struct InMemoryBuilder<'a, E> {
    evaluator: &'a E,
    /// Depth at which nodes become leaves via the fallback rule.
    height: u32,
}

impl<'a, E: SplitEvaluator> InMemoryBuilder<'a, E> {
    pub fn new(evaluator: &'a E, height: u32) -> Self {
        Self { evaluator, height }
    }

    /// Resolve `entry` and everything below it, returning the batch of
    /// resolved nodes (entry first, then children in pre-order).
    pub fn build_subtree(&self, entry: &Node) -> Result<Vec<Node>, BuilderError> {
        let mut out = Vec::new();
        self.resolve(entry.clone(), 0, &mut out)?;
        Ok(out)
    }

    fn resolve(
        &self,
        mut node: Node,
        local_depth: u32,
        out: &mut Vec<Node>,
    ) -> Result<(), BuilderError> {
        if node.depth() >= self.height {
            let value = self.evaluator.fallback_leaf(node.subset());
            node.mark_leaf(value)?;
            out.push(node);
            return Ok(());
        }
        if local_depth >= MAX_LOCAL_DEPTH {
            return Err(BuilderError::CapacityExceeded {
                id: node.id(),
                local_depth,
            });
        }

        match self.evaluator.evaluate(node.subset())? {
            Decision::Leaf { prediction } => {
                node.mark_leaf(prediction)?;
                out.push(node);
            }
            Decision::Split {
                predicate,
                left,
                right,
            } => {
                let (left_id, right_id) = node.id().children();
                let left = Node::unknown(left_id, left);
                let right = Node::unknown(right_id, right);
                node.mark_split(predicate, left_id, right_id)?;
                out.push(node);
                self.resolve(left, local_depth + 1, out)?;
                self.resolve(right, local_depth + 1, out)?;
            }
        }
        Ok(())
    }
}

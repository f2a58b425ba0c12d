//! The split-evaluation boundary.
//!
//! The scheduler never looks at data: it hands a [`SubsetRef`] to a
//! [`SplitEvaluator`] and gets back a [`Decision`]. The same capability
//! backs both paths — invoked directly by the in-memory builder, and as
//! the per-node logic inside a distributed expansion job — so the
//! evaluator must be a pure function of the subset, or the two paths
//! would produce inconsistent trees.

use serde::{Deserialize, Serialize};

/// Split evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("unknown data subset token: {token}")]
    UnknownSubset { token: u64 },

    #[error("split evaluation failed: {0}")]
    Failed(String),
}

/// Opaque reference to the rows belonging to a node.
///
/// The scheduler only reads `num_rows` (to route a node in-memory or
/// distributed) and passes the reference through. How a token maps to
/// physical rows — a partition descriptor, a row-id list, an in-memory
/// handle — is the evaluator's and job service's contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubsetRef {
    token: u64,
    num_rows: u64,
}

impl SubsetRef {
    pub fn new(token: u64, num_rows: u64) -> Self {
        Self { token, num_rows }
    }

    /// The full dataset. Token 0 is reserved for the root subset.
    pub fn root(num_rows: u64) -> Self {
        Self::new(0, num_rows)
    }

    #[inline]
    pub fn token(&self) -> u64 {
        self.token
    }

    #[inline]
    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }
}

/// Split condition chosen for a decision node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitPredicate {
    /// Feature index to split on.
    pub feature: u32,
    /// Threshold value (go left if feature < threshold).
    pub threshold: f32,
}

impl SplitPredicate {
    pub fn new(feature: u32, threshold: f32) -> Self {
        Self { feature, threshold }
    }

    /// Evaluate which direction a feature value goes. NaN goes right.
    #[inline]
    pub fn go_left(&self, value: f32) -> bool {
        value < self.threshold
    }
}

/// Outcome of evaluating one node's data subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    /// The subset resolves to a terminal prediction.
    Leaf { prediction: f64 },
    /// The subset splits; both child subsets are handed back so the
    /// scheduler can create the child nodes.
    Split {
        predicate: SplitPredicate,
        left: SubsetRef,
        right: SubsetRef,
    },
}

/// The pluggable split-selection capability.
///
/// Implementations must be deterministic for a given subset reference:
/// the distributed and in-memory paths both rely on re-evaluation after
/// a retry or crash replay reaching the same decision.
pub trait SplitEvaluator: Send + Sync {
    /// Compute the decision for one node's subset.
    fn evaluate(&self, subset: &SubsetRef) -> Result<Decision, EvalError>;

    /// Default-value rule used when a leaf must be forced without
    /// consulting the split path (height limit, recursion bound).
    fn fallback_leaf(&self, subset: &SubsetRef) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_routes_on_threshold() {
        let predicate = SplitPredicate::new(0, 0.5);
        assert!(predicate.go_left(0.3));
        assert!(!predicate.go_left(0.7));
        assert!(!predicate.go_left(0.5)); // == threshold goes right
    }

    #[test]
    fn predicate_sends_nan_right() {
        let predicate = SplitPredicate::new(0, 0.5);
        assert!(!predicate.go_left(f32::NAN));
    }

    #[test]
    fn root_subset_uses_reserved_token() {
        let root = SubsetRef::root(1000);
        assert_eq!(root.token(), 0);
        assert_eq!(root.num_rows(), 1000);
    }
}

//! planet: decision tree construction over datasets too large for one
//! machine, driven by a phase-based node-expansion scheduler.
//!
//! The tree grows breadth-first. Each phase drains the frontier of
//! unresolved nodes, resolves small data subsets locally (the whole
//! subtree at once) and batches every large subset into a single
//! distributed pass, then commits the results as one atomic checkpoint.
//! The loop terminates when the frontier is empty or every remaining
//! branch has hit the height limit, and a crashed run resumes from the
//! last committed phase.
//!
//! # Key Types
//!
//! - [`TreeBuilder`] / [`BuildConfig`] - High-level build API
//! - [`PhaseLoop`] - The scheduler state machine
//! - [`SplitEvaluator`] - Pluggable split-selection capability
//! - [`JobService`] - External distributed job-execution boundary
//! - [`TreeStore`] - Durable, conflict-checked node persistence
//! - [`Tree`] / [`Node`] / [`NodeId`] - The tree model
//!
//! # Building a tree
//!
//! Provide an evaluator and a job service, then point `TreeBuilder` at
//! a root subset. See the `build_tree` binary for a complete run using
//! the bundled in-process implementations.

pub mod config;
pub mod dataset;
pub mod evaluate;
pub mod grower;
pub mod job;
pub mod model;
pub mod store;
pub mod testing;
pub mod tree;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use config::{BuildConfig, RetryPolicy};
pub use dataset::{FeatureMeta, FeatureType, Schema, SchemaError};
pub use evaluate::{Decision, EvalError, SplitEvaluator, SplitPredicate, SubsetRef};
pub use grower::{
    BuildError, Frontier, FrontierExpansion, InMemoryBuilder, LoopState, PhaseLoop,
};
pub use job::{JobError, JobHandle, JobResult, JobService, JobSpec, LocalJobService};
pub use model::TreeBuilder;
pub use store::{StoreError, TreeStore};
pub use tree::{Node, NodeId, NodeState, Tree, TreeError};
pub use utils::{run_with_threads, Parallelism};

//! The node-expansion scheduler.
//!
//! Growth alternates between two resolution paths driven by one phase
//! loop: subsets below the in-memory threshold collapse into locally
//! built subtrees, everything else rides one batched distributed pass
//! per phase. See [`PhaseLoop`] for the control flow.

mod driver;
mod frontier;
mod local;
mod phase;

pub use driver::{LoopState, PhaseLoop};
pub use frontier::Frontier;
pub use local::{BuilderError, InMemoryBuilder, MAX_LOCAL_DEPTH};
pub use phase::{FrontierExpansion, PhaseOutcome};

use std::path::PathBuf;

use crate::evaluate::EvalError;
use crate::job::JobError;
use crate::store::StoreError;
use crate::tree::{NodeId, TreeValidationError};

/// Run-level build errors.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Precondition: the run refuses to start over existing output.
    #[error("output location already exists: {0}")]
    OutputAlreadyExists(PathBuf),

    /// A fresh store needs a root subset to seed the tree.
    #[error("no tree state to resume and no root subset provided")]
    MissingRoot,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    /// A distributed phase exhausted its retry budget.
    #[error("expansion phase {phase} failed after {attempts} attempts for nodes {nodes:?}: {source}")]
    JobFailed {
        phase: u64,
        attempts: u32,
        nodes: Vec<NodeId>,
        source: JobError,
    },

    /// A phase completed without resolving its drained nodes, or the
    /// phase counter outran the height bound.
    #[error("phase {phase} made no progress on nodes {nodes:?}")]
    NoProgress { phase: u64, nodes: Vec<NodeId> },

    #[error("completed tree failed validation: {0}")]
    Invalid(#[from] TreeValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tree export failed: {0}")]
    Export(#[from] serde_json::Error),
}

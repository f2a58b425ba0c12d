//! High-level build API.
//!
//! [`TreeBuilder`] wires the pieces together the way the demo binary
//! and most callers want them: it checks the output precondition,
//! owns the store lifecycle, sets up the worker pool, drives the phase
//! loop, and exports the finished tree.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::config::BuildConfig;
use crate::evaluate::{SplitEvaluator, SubsetRef};
use crate::grower::{BuildError, PhaseLoop};
use crate::job::JobService;
use crate::store::{StoreError, TreeStore};
use crate::tree::{NodeId, Tree};
use crate::utils::run_with_threads;

/// File names inside the output directory.
pub const STORE_FILE: &str = "tree.redb";
pub const TREE_FILE: &str = "tree.json";

/// High-level driver for a tree-building run.
pub struct TreeBuilder<'a, E, J> {
    config: BuildConfig,
    evaluator: &'a E,
    service: &'a J,
}

impl<'a, E: SplitEvaluator, J: JobService> TreeBuilder<'a, E, J> {
    pub fn new(config: BuildConfig, evaluator: &'a E, service: &'a J) -> Self {
        Self {
            config,
            evaluator,
            service,
        }
    }

    /// Build against an in-memory store. No durability; useful for
    /// tests and datasets that fit a single process anyway.
    pub fn build(&self, root: SubsetRef) -> Result<Tree, BuildError> {
        let store = TreeStore::in_memory()?;
        self.run(&store, Some(root))
    }

    /// Build durably at `output`. Fails with `OutputAlreadyExists`
    /// before writing anything if the location is taken; on success the
    /// directory holds the node store and the exported tree.
    pub fn build_at(&self, root: SubsetRef, output: &Path) -> Result<Tree, BuildError> {
        if output.exists() {
            return Err(BuildError::OutputAlreadyExists(output.to_path_buf()));
        }
        std::fs::create_dir_all(output)?;
        let store = TreeStore::open(&output.join(STORE_FILE))?;

        let tree = self.run(&store, Some(root))?;
        self.export(&tree, output)?;
        Ok(tree)
    }

    /// Resume an interrupted run from its output directory and finish
    /// it. The frontier and phase counter come from the store.
    pub fn resume(&self, output: &Path) -> Result<Tree, BuildError> {
        let store_path = output.join(STORE_FILE);
        if !store_path.exists() {
            return Err(BuildError::Store(StoreError::NotFound {
                id: NodeId::root(),
            }));
        }
        let store = TreeStore::open(&store_path)?;

        let tree = self.run(&store, None)?;
        self.export(&tree, output)?;
        Ok(tree)
    }

    fn run(&self, store: &TreeStore, root: Option<SubsetRef>) -> Result<Tree, BuildError> {
        run_with_threads(self.config.n_threads, |parallelism| {
            let mut phase_loop = PhaseLoop::new(
                store,
                self.evaluator,
                self.service,
                &self.config,
                parallelism,
            );
            phase_loop.run(root)
        })
    }

    fn export(&self, tree: &Tree, output: &Path) -> Result<(), BuildError> {
        let path = output.join(TREE_FILE);
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), tree)?;
        tracing::info!(path = %path.display(), "stored the tree");
        Ok(())
    }
}

//! The phase loop.
//!
//! A single coordinating control flow drains the frontier one phase at
//! a time: small-subset nodes resolve locally on the worker pool, all
//! large-subset nodes share one distributed pass, and everything the
//! phase produced commits to the store as one atomic checkpoint before
//! the next phase starts. Phases are strictly sequential; that is what
//! makes growth breadth-first and crash recovery well-defined.

use std::collections::HashSet;
use std::time::Instant;

use crate::config::BuildConfig;
use crate::evaluate::{SplitEvaluator, SubsetRef};
use crate::job::JobService;
use crate::store::TreeStore;
use crate::tree::{Node, NodeId, Tree, MAX_DEPTH};
use crate::utils::Parallelism;

use super::{BuildError, Frontier, FrontierExpansion, InMemoryBuilder};
use super::local::BuilderError;

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Looping,
    Draining,
    Done,
    Failed,
}

/// The top-level node-expansion scheduler.
pub struct PhaseLoop<'a, E, J> {
    store: &'a TreeStore,
    evaluator: &'a E,
    service: &'a J,
    config: &'a BuildConfig,
    parallelism: Parallelism,
    state: LoopState,
    phase: u64,
}

impl<'a, E: SplitEvaluator, J: JobService> PhaseLoop<'a, E, J> {
    pub fn new(
        store: &'a TreeStore,
        evaluator: &'a E,
        service: &'a J,
        config: &'a BuildConfig,
        parallelism: Parallelism,
    ) -> Self {
        Self {
            store,
            evaluator,
            service,
            config,
            parallelism,
            state: LoopState::Initializing,
            phase: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// The phase counter of the next phase to run.
    pub fn phase(&self) -> u64 {
        self.phase
    }

    /// Depth at which every remaining branch is forced into a leaf.
    /// Capped by the node identity width even when no height is
    /// configured.
    fn effective_height(&self) -> u32 {
        self.config.height.unwrap_or(MAX_DEPTH).min(MAX_DEPTH)
    }

    /// Drive the loop to completion and return the final tree.
    ///
    /// `root` seeds a fresh store; when the store already holds tree
    /// state, the run resumes from the last committed phase and `root`
    /// is ignored.
    pub fn run(&mut self, root: Option<SubsetRef>) -> Result<Tree, BuildError> {
        match self.run_inner(root) {
            Ok(tree) => {
                self.state = LoopState::Done;
                Ok(tree)
            }
            Err(err) => {
                self.state = LoopState::Failed;
                Err(err)
            }
        }
    }

    fn run_inner(&mut self, root: Option<SubsetRef>) -> Result<Tree, BuildError> {
        tracing::info!("building the tree");
        let started = Instant::now();

        let mut frontier = self.initialize(root)?;
        self.state = LoopState::Looping;

        while !frontier.is_empty() {
            self.run_phase(&mut frontier)?;
        }

        self.state = LoopState::Draining;
        let tree = self.store.snapshot()?;
        tree.validate()?;

        tracing::info!(
            phases = self.phase,
            nodes = tree.len(),
            leaves = tree.num_leaves(),
            depth = tree.max_depth(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tree build complete"
        );
        Ok(tree)
    }

    fn initialize(&mut self, root: Option<SubsetRef>) -> Result<Frontier, BuildError> {
        let mut frontier = Frontier::new();

        if self.store.try_get(NodeId::root())?.is_some() {
            // Resume: the frontier is exactly the persisted unresolved
            // set, and the counter continues past the last checkpoint.
            let snapshot = self.store.snapshot()?;
            for node in snapshot.unknown() {
                frontier.push(node.clone());
            }
            self.phase = match self.store.phase()? {
                Some(committed) => committed + 1,
                None => 0,
            };
            tracing::info!(
                phase = self.phase,
                frontier = frontier.len(),
                "resuming from persisted tree state"
            );
        } else {
            let subset = root.ok_or(BuildError::MissingRoot)?;
            let node = Node::unknown(NodeId::root(), subset);
            self.store.put(&node)?;
            frontier.push(node);
        }
        Ok(frontier)
    }

    fn run_phase(&mut self, frontier: &mut Frontier) -> Result<(), BuildError> {
        let height = self.effective_height();

        // Every phase deepens the frontier by one level, so a counter
        // past height + 1 means the loop is spinning without progress.
        if self.phase > height as u64 + 1 {
            return Err(BuildError::NoProgress {
                phase: self.phase,
                nodes: frontier.drain_phase().iter().map(|n| n.id()).collect(),
            });
        }

        let batch = frontier.drain_phase();
        let drained: Vec<NodeId> = batch.iter().map(|n| n.id()).collect();

        let mut commits: Vec<Node> = Vec::new();
        let mut small: Vec<Node> = Vec::new();
        let mut large: Vec<Node> = Vec::new();
        for mut node in batch {
            if node.depth() >= height {
                let value = self.evaluator.fallback_leaf(node.subset());
                mark_fallback_leaf(&mut node, value);
                commits.push(node);
            } else if node.subset().num_rows() < self.config.threshold {
                small.push(node);
            } else {
                large.push(node);
            }
        }
        tracing::info!(
            phase = self.phase,
            local = small.len(),
            distributed = large.len(),
            forced = commits.len(),
            "expansion phase started"
        );

        // Small subsets: disjoint data, safe to fan out across the pool.
        let builder = InMemoryBuilder::new(self.evaluator, height);
        let results = self
            .parallelism
            .maybe_par_map(&small, |node| builder.build_subtree(node));
        for (node, result) in small.iter().zip(results) {
            match result {
                Ok(subtree) => commits.extend(subtree),
                Err(BuilderError::Eval(err)) => return Err(err.into()),
                Err(err) => {
                    // Node-local failure: fall back to a leaf so the
                    // loop still terminates.
                    tracing::warn!(node = %node.id(), %err, "local build failed, forcing leaf");
                    let mut node = node.clone();
                    let value = self.evaluator.fallback_leaf(node.subset());
                    mark_fallback_leaf(&mut node, value);
                    commits.push(node);
                }
            }
        }

        // All large subsets share a single distributed pass.
        let mut next: Vec<Node> = Vec::new();
        if !large.is_empty() {
            let expansion = FrontierExpansion::new(self.service, self.config.retry.clone());
            let outcome = expansion.expand(self.phase, large)?;
            commits.extend(outcome.resolved);
            commits.extend(outcome.children.iter().cloned());
            next = outcome.children;
        }

        self.store.commit_phase(self.phase, &commits)?;

        // Every drained node must now be terminal, or the store did not
        // genuinely move forward this phase.
        let terminal: HashSet<NodeId> = commits
            .iter()
            .filter(|n| n.is_terminal())
            .map(|n| n.id())
            .collect();
        let stuck: Vec<NodeId> = drained
            .iter()
            .filter(|id| !terminal.contains(id))
            .copied()
            .collect();
        if !stuck.is_empty() {
            return Err(BuildError::NoProgress {
                phase: self.phase,
                nodes: stuck,
            });
        }

        for child in next {
            frontier.push(child);
        }
        self.phase += 1;
        Ok(())
    }
}

fn mark_fallback_leaf(node: &mut Node, value: f64) {
    if let Err(err) = node.mark_leaf(value) {
        tracing::warn!(node = %node.id(), %err, "skipping transition, keeping stored state");
    }
}

//! End-to-end phase loop scenarios.
//!
//! Focused on behavior and invariants: routing, batching, height
//! enforcement, and termination.

use std::sync::Arc;

use rstest::rstest;

use planet::testing::{InMemoryDataset, ScriptedEvaluator, VarianceEvaluator};
use planet::{
    BuildConfig, LocalJobService, LoopState, Parallelism, PhaseLoop, SplitEvaluator, SubsetRef,
    TreeStore,
};

fn run_scripted(
    evaluator: ScriptedEvaluator,
    config: BuildConfig,
    root_rows: u64,
) -> (planet::Tree, LocalJobService<ScriptedEvaluator>, TreeStore) {
    let evaluator = Arc::new(evaluator);
    let service = LocalJobService::new(evaluator.clone()).with_parallelism(Parallelism::Sequential);
    let store = TreeStore::in_memory().unwrap();

    let tree = {
        let mut phase_loop =
            PhaseLoop::new(&store, &*evaluator, &service, &config, Parallelism::Sequential);
        let tree = phase_loop.run(Some(SubsetRef::root(root_rows))).unwrap();
        assert_eq!(phase_loop.state(), LoopState::Done);
        tree
    };
    (tree, service, store)
}

/// The reference scenario: root of 1000 rows, threshold 100, height 2.
/// Two distributed phases split depths 0 and 1; every depth-2 node is
/// forced into a leaf by the height limit without touching the
/// evaluator's split path.
#[test]
fn thousand_row_scenario_builds_the_expected_shape() {
    let mut evaluator = ScriptedEvaluator::new(-1.0);
    evaluator.split(0, 0, 0.5, (1, 600), (2, 400));
    evaluator.split(1, 1, 0.3, (3, 300), (4, 300));
    evaluator.split(2, 2, 0.7, (5, 200), (6, 200));
    // Tokens 3-6 are deliberately unscripted: depth 2 equals the height
    // limit, so evaluating them would be a bug.

    let config = BuildConfig::new(100).with_height(2);
    let (tree, service, store) = run_scripted(evaluator, config, 1000);

    tree.validate().unwrap();
    assert_eq!(tree.len(), 7);
    assert_eq!(tree.num_splits(), 3);
    assert_eq!(tree.num_leaves(), 4);
    assert_eq!(tree.max_depth(), 2);

    // Exactly one split at depth 0, and no split at the height limit.
    assert!(tree.root().unwrap().is_split());
    for node in tree.nodes() {
        if node.depth() == 2 {
            assert!(node.is_leaf());
            assert_eq!(node.prediction(), Some(-1.0));
        }
    }

    // Depths 0 and 1 each took one batched job; depth 2 took none.
    assert_eq!(service.submissions(), 2);
    // Three phases committed, within the height + 1 bound.
    assert_eq!(store.phase().unwrap(), Some(2));
}

/// Threshold above the root size: the whole tree resolves in-memory in
/// a single phase with zero distributed submissions.
#[test]
fn oversized_threshold_never_submits_a_job() {
    let mut evaluator = ScriptedEvaluator::new(0.0);
    evaluator.split(0, 0, 0.5, (1, 600), (2, 400));
    evaluator.leaf(1, 1.0);
    evaluator.leaf(2, 2.0);

    let config = BuildConfig::new(5000).with_height(8);
    let (tree, service, store) = run_scripted(evaluator, config, 1000);

    tree.validate().unwrap();
    assert_eq!(tree.len(), 3);
    assert_eq!(service.submissions(), 0);
    assert_eq!(store.phase().unwrap(), Some(0));
}

/// A phase with both routes: the small sibling resolves locally while
/// the large one rides the distributed pass, in the same phase.
#[test]
fn mixed_batches_split_between_local_and_distributed() {
    let mut evaluator = ScriptedEvaluator::new(0.0);
    evaluator.split(0, 0, 0.5, (1, 600), (2, 50));
    evaluator.leaf(1, 1.0); // distributed at phase 1
    evaluator.leaf(2, 2.0); // local at phase 1

    let config = BuildConfig::new(100).with_height(8);
    let (tree, service, _store) = run_scripted(evaluator, config, 1000);

    tree.validate().unwrap();
    assert_eq!(tree.len(), 3);
    // Phase 0: root. Phase 1: only the 600-row child is batched.
    assert_eq!(service.submissions(), 2);
}

/// Routing boundary: a subset exactly at the threshold is large.
#[rstest]
#[case(100, 1)] // == threshold: distributed
#[case(99, 0)] // < threshold: in-memory
fn threshold_boundary_routes_correctly(#[case] root_rows: u64, #[case] expected_jobs: u64) {
    let mut evaluator = ScriptedEvaluator::new(0.0);
    evaluator.leaf(0, 1.0);

    let config = BuildConfig::new(100).with_height(8);
    let (tree, service, _store) = run_scripted(evaluator, config, root_rows);

    assert_eq!(tree.len(), 1);
    assert_eq!(service.submissions(), expected_jobs);
}

/// A real evaluator end to end: mixed routing, height enforcement,
/// and a tree that actually predicts.
#[test]
fn variance_evaluator_builds_a_bounded_valid_tree() {
    let data = InMemoryDataset::synthetic(2000, 3, 7);
    let rows = data.num_rows();
    let sample: Vec<Vec<f32>> = (0..20).map(|r| data.row(r * 97)).collect();

    let evaluator = Arc::new(VarianceEvaluator::new(data));
    let service = LocalJobService::new(evaluator.clone()).with_parallelism(Parallelism::Sequential);
    let store = TreeStore::in_memory().unwrap();
    let config = BuildConfig::new(500).with_height(3);

    let mut phase_loop =
        PhaseLoop::new(&store, &*evaluator, &service, &config, Parallelism::Sequential);
    let tree = phase_loop.run(Some(SubsetRef::root(rows))).unwrap();

    tree.validate().unwrap();
    assert!(tree.max_depth() <= 3);
    for node in tree.nodes() {
        if node.depth() == 3 {
            assert!(node.is_leaf());
        }
    }

    // The 2000-row root is above the threshold, so at least the first
    // phase was distributed.
    assert!(service.submissions() >= 1);
    // Termination bound: at most height + 1 phases.
    assert!(store.phase().unwrap().unwrap() <= 3);

    for row in &sample {
        assert!(tree.predict(row).is_some());
    }
}

/// The forced-leaf value at the height limit comes from the fallback
/// rule, which sees the node's data subset.
#[test]
fn fallback_leaves_use_the_subset_mean() {
    let columns = vec![vec![0.1, 0.2, 0.8, 0.9]];
    let targets = vec![1.0, 1.0, 3.0, 3.0];
    let data = InMemoryDataset::new(columns, targets);
    let rows = data.num_rows();

    let evaluator = Arc::new(VarianceEvaluator::new(data));
    let service = LocalJobService::new(evaluator.clone()).with_parallelism(Parallelism::Sequential);
    let store = TreeStore::in_memory().unwrap();
    // Height 0: the root itself is forced into a leaf.
    let config = BuildConfig::new(100).with_height(0);

    let mut phase_loop =
        PhaseLoop::new(&store, &*evaluator, &service, &config, Parallelism::Sequential);
    let tree = phase_loop.run(Some(SubsetRef::root(rows))).unwrap();

    assert_eq!(tree.len(), 1);
    let root = tree.root().unwrap();
    assert_eq!(root.prediction(), Some(2.0));
    assert_eq!(
        root.prediction(),
        Some(evaluator.fallback_leaf(&SubsetRef::root(rows)))
    );
    assert_eq!(service.submissions(), 0);
}

//! Crash recovery and replay idempotence.
//!
//! Phases commit atomically, so a failed run leaves the store at its
//! last committed checkpoint and a resumed run finishes from there,
//! reaching the same final state as an uninterrupted run.

use std::sync::Arc;
use std::time::Duration;

use planet::testing::ScriptedEvaluator;
use planet::{
    BuildConfig, BuildError, LocalJobService, LoopState, Parallelism, PhaseLoop, RetryPolicy,
    SubsetRef, Tree, TreeStore,
};

fn full_script() -> ScriptedEvaluator {
    let mut evaluator = ScriptedEvaluator::new(-1.0);
    evaluator.split(0, 0, 0.5, (1, 600), (2, 400));
    evaluator.split(1, 1, 0.3, (3, 300), (4, 300));
    evaluator.split(2, 2, 0.7, (5, 200), (6, 200));
    evaluator
}

/// Only the root decision is known; depth-1 evaluation fails, which
/// kills the run after phase 0 commits — a stand-in for a crash
/// mid-build.
fn partial_script() -> ScriptedEvaluator {
    let mut evaluator = ScriptedEvaluator::new(-1.0);
    evaluator.split(0, 0, 0.5, (1, 600), (2, 400));
    evaluator
}

fn config() -> BuildConfig {
    BuildConfig::new(100).with_height(2).with_retry(RetryPolicy {
        max_attempts: 2,
        timeout: Duration::from_secs(1),
    })
}

fn run_to_completion(store: &TreeStore, evaluator: ScriptedEvaluator) -> Tree {
    let evaluator = Arc::new(evaluator);
    let service = LocalJobService::new(evaluator.clone()).with_parallelism(Parallelism::Sequential);
    let cfg = config();
    let mut phase_loop =
        PhaseLoop::new(store, &*evaluator, &service, &cfg, Parallelism::Sequential);
    phase_loop
        .run(Some(SubsetRef::root(1000)))
        .expect("full script should complete")
}

#[test]
fn interrupted_run_resumes_to_the_same_final_state() {
    // Reference: one uninterrupted run.
    let reference_store = TreeStore::in_memory().unwrap();
    let reference = run_to_completion(&reference_store, full_script());

    // Interrupted: phase 0 commits, phase 1 dies.
    let store = TreeStore::in_memory().unwrap();
    let cfg = config();
    {
        let evaluator = Arc::new(partial_script());
        let service =
            LocalJobService::new(evaluator.clone()).with_parallelism(Parallelism::Sequential);
        let mut phase_loop =
            PhaseLoop::new(&store, &*evaluator, &service, &cfg, Parallelism::Sequential);
        let err = phase_loop.run(Some(SubsetRef::root(1000))).unwrap_err();
        assert_eq!(phase_loop.state(), LoopState::Failed);
        assert!(matches!(err, BuildError::JobFailed { phase: 1, .. }));
    }

    // The checkpoint holds exactly phase 0: a split root and two
    // unresolved children.
    assert_eq!(store.phase().unwrap(), Some(0));
    let checkpoint = store.snapshot().unwrap();
    assert_eq!(checkpoint.len(), 3);
    assert_eq!(checkpoint.unknown().count(), 2);

    // Resume with a working evaluator; no root subset is needed.
    let resumed = {
        let evaluator = Arc::new(full_script());
        let service =
            LocalJobService::new(evaluator.clone()).with_parallelism(Parallelism::Sequential);
        let mut phase_loop =
            PhaseLoop::new(&store, &*evaluator, &service, &cfg, Parallelism::Sequential);
        let tree = phase_loop.run(None).unwrap();
        // Only the depth-1 batch needed a job; depth 2 is forced leaves.
        assert_eq!(service.submissions(), 1);
        tree
    };

    assert_eq!(resumed, reference);
    assert_eq!(store.phase().unwrap(), Some(2));
}

#[test]
fn failed_phase_commits_nothing() {
    let store = TreeStore::in_memory().unwrap();
    let cfg = config();
    let evaluator = Arc::new(full_script());
    let service = LocalJobService::new(evaluator.clone()).with_parallelism(Parallelism::Sequential);
    service.fail_next(u32::MAX);

    let mut phase_loop =
        PhaseLoop::new(&store, &*evaluator, &service, &cfg, Parallelism::Sequential);
    let err = phase_loop.run(Some(SubsetRef::root(1000))).unwrap_err();
    assert!(matches!(err, BuildError::JobFailed { phase: 0, attempts: 2, .. }));

    // All-or-nothing: no phase committed, the root is still unresolved.
    assert_eq!(store.phase().unwrap(), None);
    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.unknown().count(), 1);
}

#[test]
fn transient_failures_recover_within_the_retry_budget() {
    let store = TreeStore::in_memory().unwrap();
    let cfg = config();
    let evaluator = Arc::new(full_script());
    let service = LocalJobService::new(evaluator.clone()).with_parallelism(Parallelism::Sequential);
    service.fail_next(1);

    let mut phase_loop =
        PhaseLoop::new(&store, &*evaluator, &service, &cfg, Parallelism::Sequential);
    let tree = phase_loop.run(Some(SubsetRef::root(1000))).unwrap();

    tree.validate().unwrap();
    // Phase 0 took two attempts, phase 1 one.
    assert_eq!(service.submissions(), 3);

    // Same result as a run that never failed.
    let reference_store = TreeStore::in_memory().unwrap();
    let reference = run_to_completion(&reference_store, full_script());
    assert_eq!(tree, reference);
}

#[test]
fn resuming_a_completed_run_is_a_no_op() {
    let store = TreeStore::in_memory().unwrap();
    let reference = run_to_completion(&store, full_script());

    let evaluator = Arc::new(full_script());
    let service = LocalJobService::new(evaluator.clone()).with_parallelism(Parallelism::Sequential);
    let cfg = config();
    let mut phase_loop =
        PhaseLoop::new(&store, &*evaluator, &service, &cfg, Parallelism::Sequential);
    let tree = phase_loop.run(None).unwrap();

    assert_eq!(tree, reference);
    assert_eq!(service.submissions(), 0);
}

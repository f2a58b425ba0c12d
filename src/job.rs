//! The job-execution boundary for distributed expansion phases.
//!
//! One phase submits one [`JobSpec`] covering every batched node and
//! waits for a [`JobResult`] mapping each node identity back to its
//! decision. The boundary is a synchronous request/response pair with
//! an explicit timeout; retry policy lives with the caller, which is
//! safe because the evaluator is pure and store writes are idempotent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::evaluate::{Decision, SplitEvaluator, SubsetRef};
use crate::tree::{Node, NodeId};
use crate::utils::Parallelism;

/// Job-execution errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("job submission rejected: {0}")]
    Rejected(String),

    #[error("distributed job failed: {0}")]
    Failed(String),

    #[error("distributed job timed out after {0:?}")]
    TimedOut(Duration),

    #[error("unknown job handle: {0:?}")]
    UnknownHandle(JobHandle),

    /// The service reported a result that does not cover every input
    /// node. Partial reports are never applied; the whole phase is
    /// retried.
    #[error("job result is missing a decision for node {0}")]
    MissingDecision(NodeId),
}

/// Opaque handle to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u64);

/// One phase's worth of node-expansion work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub phase: u64,
    /// Every node identity and subset reference to evaluate.
    pub nodes: Vec<(NodeId, SubsetRef)>,
}

impl JobSpec {
    pub fn new(phase: u64, nodes: &[Node]) -> Self {
        Self {
            phase,
            nodes: nodes.iter().map(|n| (n.id(), *n.subset())).collect(),
        }
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|(id, _)| *id).collect()
    }
}

/// Per-node decisions reported by a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    decisions: Vec<(NodeId, Decision)>,
}

impl JobResult {
    pub fn new(decisions: Vec<(NodeId, Decision)>) -> Self {
        Self { decisions }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.decisions.iter().any(|(d, _)| *d == id)
    }

    pub fn into_map(self) -> HashMap<NodeId, Decision> {
        self.decisions.into_iter().collect()
    }
}

/// The external distributed job-execution service.
///
/// Submission and completion are separate so a caller can model a real
/// cluster API; the scheduler always pairs them back to back.
pub trait JobService: Send + Sync {
    fn submit(&self, spec: JobSpec) -> Result<JobHandle, JobError>;

    fn wait(&self, handle: JobHandle, timeout: Duration) -> Result<JobResult, JobError>;
}

/// In-process job service: runs the split evaluator over the batch on
/// the local machine.
///
/// This is the interchangeability contract made concrete — the same
/// evaluator that backs the in-memory builder backs a "distributed"
/// pass, so tests can drive the whole phase loop without a cluster.
/// Failure injection (`fail_next`) exists so retry behavior is testable.
pub struct LocalJobService<E> {
    evaluator: Arc<E>,
    parallelism: Parallelism,
    next_handle: AtomicU64,
    completed: Mutex<HashMap<u64, Result<JobResult, JobError>>>,
    submissions: AtomicU64,
    fail_next: AtomicU32,
}

impl<E: SplitEvaluator> LocalJobService<E> {
    pub fn new(evaluator: Arc<E>) -> Self {
        Self {
            evaluator,
            parallelism: Parallelism::Parallel,
            next_handle: AtomicU64::new(1),
            completed: Mutex::new(HashMap::new()),
            submissions: AtomicU64::new(0),
            fail_next: AtomicU32::new(0),
        }
    }

    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Number of jobs submitted so far.
    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    /// Make the next `n` submissions fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::Relaxed);
    }

    fn run(&self, spec: &JobSpec) -> Result<JobResult, JobError> {
        let evaluator = &self.evaluator;
        let decisions = self
            .parallelism
            .maybe_par_map(&spec.nodes, |(id, subset)| {
                evaluator.evaluate(subset).map(|decision| (*id, decision))
            })
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| JobError::Failed(e.to_string()))?;
        Ok(JobResult::new(decisions))
    }
}

impl<E: SplitEvaluator> JobService for LocalJobService<E> {
    fn submit(&self, spec: JobSpec) -> Result<JobHandle, JobError> {
        self.submissions.fetch_add(1, Ordering::Relaxed);

        let inject = self
            .fail_next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        let outcome = if inject {
            Err(JobError::Failed("injected failure".into()))
        } else {
            self.run(&spec)
        };

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.completed.lock().unwrap().insert(id, outcome);
        Ok(JobHandle(id))
    }

    fn wait(&self, handle: JobHandle, _timeout: Duration) -> Result<JobResult, JobError> {
        self.completed
            .lock()
            .unwrap()
            .remove(&handle.0)
            .unwrap_or(Err(JobError::UnknownHandle(handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedEvaluator;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn local_service_maps_every_node_to_a_decision() {
        let mut evaluator = ScriptedEvaluator::new(0.0);
        evaluator.leaf(0, 1.0);
        evaluator.leaf(7, 2.0);
        let service = LocalJobService::new(Arc::new(evaluator))
            .with_parallelism(Parallelism::Sequential);

        let nodes = vec![
            Node::unknown(NodeId::root(), SubsetRef::root(10)),
            Node::unknown(NodeId::root().left_child(), SubsetRef::new(7, 5)),
        ];
        let spec = JobSpec::new(3, &nodes);
        let handle = service.submit(spec.clone()).unwrap();
        let result = service.wait(handle, TIMEOUT).unwrap();

        for id in spec.node_ids() {
            assert!(result.contains(id));
        }
        assert_eq!(service.submissions(), 1);
    }

    #[test]
    fn injected_failures_surface_and_then_clear() {
        let mut evaluator = ScriptedEvaluator::new(0.0);
        evaluator.leaf(0, 1.0);
        let service = LocalJobService::new(Arc::new(evaluator));
        service.fail_next(1);

        let nodes = vec![Node::unknown(NodeId::root(), SubsetRef::root(10))];
        let spec = JobSpec::new(0, &nodes);

        let handle = service.submit(spec.clone()).unwrap();
        assert!(service.wait(handle, TIMEOUT).is_err());

        let handle = service.submit(spec).unwrap();
        assert!(service.wait(handle, TIMEOUT).is_ok());
        assert_eq!(service.submissions(), 2);
    }

    #[test]
    fn waiting_twice_on_a_handle_fails() {
        let mut evaluator = ScriptedEvaluator::new(0.0);
        evaluator.leaf(0, 1.0);
        let service = LocalJobService::new(Arc::new(evaluator));

        let nodes = vec![Node::unknown(NodeId::root(), SubsetRef::root(10))];
        let handle = service.submit(JobSpec::new(0, &nodes)).unwrap();
        service.wait(handle, TIMEOUT).unwrap();

        let err = service.wait(handle, TIMEOUT).unwrap_err();
        assert!(matches!(err, JobError::UnknownHandle(_)));
    }
}

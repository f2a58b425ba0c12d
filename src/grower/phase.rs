//! One distributed frontier-expansion pass.
//!
//! Every large node in the current batch rides a single job — that
//! batching, not per-node jobs, is what keeps the number of cluster
//! round-trips proportional to tree height instead of node count. The
//! pass is all-or-nothing: a failed or partially reported job is
//! retried in full with the identical spec, which is safe because the
//! evaluator is pure and store writes are idempotent.

use crate::config::RetryPolicy;
use crate::evaluate::Decision;
use crate::job::{JobError, JobResult, JobService, JobSpec};
use crate::tree::Node;

use super::BuildError;

/// Nodes produced by one expansion pass.
#[derive(Debug, Default)]
pub struct PhaseOutcome {
    /// The input nodes, now resolved into leaves or splits.
    pub resolved: Vec<Node>,
    /// Newly created `Unknown` children, to be enqueued for the next
    /// phase.
    pub children: Vec<Node>,
}

/// Runs one batched distributed pass over a set of unresolved nodes.
pub struct FrontierExpansion<'a, J> {
    service: &'a J,
    retry: RetryPolicy,
}

impl<'a, J: JobService> FrontierExpansion<'a, J> {
    pub fn new(service: &'a J, retry: RetryPolicy) -> Self {
        Self { service, retry }
    }

    /// Expand every given node through one distributed job.
    ///
    /// An empty batch is a no-op and is never submitted.
    pub fn expand(&self, phase: u64, nodes: Vec<Node>) -> Result<PhaseOutcome, BuildError> {
        if nodes.is_empty() {
            return Ok(PhaseOutcome::default());
        }

        let spec = JobSpec::new(phase, &nodes);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_once(&spec) {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(phase, attempt, "expansion job recovered after retry");
                    }
                    return Ok(self.apply(nodes, result));
                }
                Err(source) if attempt >= max_attempts => {
                    return Err(BuildError::JobFailed {
                        phase,
                        attempts: attempt,
                        nodes: spec.node_ids(),
                        source,
                    });
                }
                Err(error) => {
                    tracing::warn!(phase, attempt, %error, "expansion job failed, resubmitting");
                }
            }
        }
    }

    fn try_once(&self, spec: &JobSpec) -> Result<JobResult, JobError> {
        let handle = self.service.submit(spec.clone())?;
        let result = self.service.wait(handle, self.retry.timeout)?;

        // Partial reports are treated as a failure of the whole pass.
        for (id, _) in &spec.nodes {
            if !result.contains(*id) {
                return Err(JobError::MissingDecision(*id));
            }
        }
        Ok(result)
    }

    /// Turn decisions into resolved nodes and new children. A node
    /// that is somehow already terminal (a replayed batch) is kept as
    /// the store recorded it rather than transitioned again.
    fn apply(&self, nodes: Vec<Node>, result: JobResult) -> PhaseOutcome {
        let mut decisions = result.into_map();
        let mut outcome = PhaseOutcome::default();

        for mut node in nodes {
            if !node.is_unknown() {
                tracing::warn!(node = %node.id(), "node already resolved, keeping stored state");
                continue;
            }
            let Some(decision) = decisions.remove(&node.id()) else {
                // Completeness was checked before apply.
                tracing::warn!(node = %node.id(), "decision vanished from job result");
                continue;
            };
            match decision {
                Decision::Leaf { prediction } => {
                    if node.mark_leaf(prediction).is_ok() {
                        outcome.resolved.push(node);
                    }
                }
                Decision::Split {
                    predicate,
                    left,
                    right,
                } => {
                    let (left_id, right_id) = node.id().children();
                    if node.mark_split(predicate, left_id, right_id).is_ok() {
                        outcome.resolved.push(node);
                        outcome.children.push(Node::unknown(left_id, left));
                        outcome.children.push(Node::unknown(right_id, right));
                    }
                }
            }
        }
        outcome
    }
}

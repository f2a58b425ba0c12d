//! Build configuration.
//!
//! Plain parameter structs with defaults and `with_*` setters. The
//! in-memory threshold is the one knob with no sensible default: it is
//! the routing boundary between local and distributed resolution and
//! depends entirely on worker memory, so constructors require it.

use std::time::Duration;

/// Retry policy for distributed expansion jobs.
///
/// The same job spec is re-submitted on failure; this is safe because
/// the evaluator is pure and store writes are idempotent.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per phase, including the first (minimum 1).
    pub max_attempts: u32,
    /// Passed to `JobService::wait` for each attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Parameters for one tree-building run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Minimum subset size at which a node is resolved via a
    /// distributed pass; anything smaller is built in memory.
    pub threshold: u64,
    /// Maximum tree height; nodes at this depth become leaves via the
    /// fallback rule. `None` leaves depth bounded only by the node
    /// identity width.
    pub height: Option<u32>,
    /// Worker threads for in-memory builds (0 = auto, 1 = sequential).
    pub n_threads: usize,
    /// Retry policy for distributed phases.
    pub retry: RetryPolicy,
}

impl BuildConfig {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            height: None,
            n_threads: 0,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

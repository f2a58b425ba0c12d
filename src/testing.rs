//! Deterministic evaluators and synthetic data for tests, benches, and
//! the demo binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::prelude::*;

use crate::evaluate::{Decision, EvalError, SplitEvaluator, SplitPredicate, SubsetRef};

// =============================================================================
// ScriptedEvaluator
// =============================================================================

/// Evaluator with fully scripted decisions, keyed by subset token.
///
/// Tests use this to dictate exact tree shapes and subset sizes
/// (e.g. a 1000-row root splitting 600/400). Unscripted tokens fail
/// with `UnknownSubset`, which doubles as a probe that a token was
/// never supposed to be evaluated.
#[derive(Debug, Default)]
pub struct ScriptedEvaluator {
    decisions: HashMap<u64, Decision>,
    fallback: f64,
}

impl ScriptedEvaluator {
    pub fn new(fallback: f64) -> Self {
        Self {
            decisions: HashMap::new(),
            fallback,
        }
    }

    /// Script a leaf decision for a subset token.
    pub fn leaf(&mut self, token: u64, prediction: f64) -> &mut Self {
        self.decisions.insert(token, Decision::Leaf { prediction });
        self
    }

    /// Script a split decision: `(token, rows)` pairs describe the two
    /// child subsets.
    pub fn split(
        &mut self,
        token: u64,
        feature: u32,
        threshold: f32,
        left: (u64, u64),
        right: (u64, u64),
    ) -> &mut Self {
        self.decisions.insert(
            token,
            Decision::Split {
                predicate: SplitPredicate::new(feature, threshold),
                left: SubsetRef::new(left.0, left.1),
                right: SubsetRef::new(right.0, right.1),
            },
        );
        self
    }
}

impl SplitEvaluator for ScriptedEvaluator {
    fn evaluate(&self, subset: &SubsetRef) -> Result<Decision, EvalError> {
        self.decisions
            .get(&subset.token())
            .cloned()
            .ok_or(EvalError::UnknownSubset {
                token: subset.token(),
            })
    }

    fn fallback_leaf(&self, _subset: &SubsetRef) -> f64 {
        self.fallback
    }
}

// =============================================================================
// Synthetic data
// =============================================================================

/// A small column-major dataset held entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    columns: Vec<Vec<f32>>,
    targets: Vec<f64>,
}

impl InMemoryDataset {
    pub fn new(columns: Vec<Vec<f32>>, targets: Vec<f64>) -> Self {
        for col in &columns {
            assert_eq!(col.len(), targets.len(), "column/target length mismatch");
        }
        Self { columns, targets }
    }

    /// Load a headerless numeric CSV: every column but the last is a
    /// feature, the last is the target.
    pub fn from_csv(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let file = std::fs::File::open(path)?;
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(file);

        let mut columns: Vec<Vec<f32>> = Vec::new();
        let mut targets: Vec<f64> = Vec::new();
        for (row_idx, result) in rdr.records().enumerate() {
            let record = result?;
            if record.len() < 2 {
                return Err(format!("row {} has fewer than 2 columns", row_idx + 1).into());
            }
            if columns.is_empty() {
                columns = vec![Vec::new(); record.len() - 1];
            } else if record.len() - 1 != columns.len() {
                return Err(format!(
                    "row {} has {} columns, expected {}",
                    row_idx + 1,
                    record.len(),
                    columns.len() + 1
                )
                .into());
            }
            for (j, column) in columns.iter_mut().enumerate() {
                column.push(record[j].trim().parse()?);
            }
            targets.push(record[record.len() - 1].trim().parse()?);
        }
        if targets.is_empty() {
            return Err("dataset is empty".into());
        }
        Ok(Self { columns, targets })
    }

    /// Random features in `[0, 1)` with piecewise-constant targets, so
    /// trees have real structure to find. Deterministic per seed.
    pub fn synthetic(rows: usize, cols: usize, seed: u64) -> Self {
        assert!(cols >= 1);
        let mut rng = StdRng::seed_from_u64(seed);
        let columns: Vec<Vec<f32>> = (0..cols)
            .map(|_| (0..rows).map(|_| rng.gen::<f32>()).collect())
            .collect();
        let targets = (0..rows)
            .map(|r| {
                let x = columns[0][r];
                let y = columns[cols.min(2) - 1][r];
                let mut t = if x < 0.5 { -1.0 } else { 1.0 };
                if y < 0.25 {
                    t += 0.5;
                }
                t
            })
            .collect();
        Self { columns, targets }
    }

    pub fn num_rows(&self) -> u64 {
        self.targets.len() as u64
    }

    pub fn num_features(&self) -> usize {
        self.columns.len()
    }

    /// One row of feature values.
    pub fn row(&self, r: usize) -> Vec<f32> {
        self.columns.iter().map(|col| col[r]).collect()
    }
}

// =============================================================================
// VarianceEvaluator
// =============================================================================

/// Greedy variance-reduction evaluator over an [`InMemoryDataset`].
///
/// Subset tokens map to row-id lists in an internal registry (token 0
/// is the full dataset); decisions are memoized per token so repeated
/// evaluation — a retried job, a replayed phase — always reproduces the
/// same decision and the same child tokens.
pub struct VarianceEvaluator {
    data: InMemoryDataset,
    min_rows_to_split: usize,
    subsets: Mutex<HashMap<u64, Arc<Vec<u32>>>>,
    decisions: Mutex<HashMap<u64, Decision>>,
    next_token: AtomicU64,
}

impl VarianceEvaluator {
    pub fn new(data: InMemoryDataset) -> Self {
        Self {
            data,
            min_rows_to_split: 2,
            subsets: Mutex::new(HashMap::new()),
            decisions: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    fn rows_for(&self, subset: &SubsetRef) -> Result<Arc<Vec<u32>>, EvalError> {
        if subset.token() == 0 {
            return Ok(Arc::new((0..self.data.num_rows() as u32).collect()));
        }
        self.subsets
            .lock()
            .unwrap()
            .get(&subset.token())
            .cloned()
            .ok_or(EvalError::UnknownSubset {
                token: subset.token(),
            })
    }

    fn mean(&self, rows: &[u32]) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        let sum: f64 = rows.iter().map(|&r| self.data.targets[r as usize]).sum();
        sum / rows.len() as f64
    }

    /// Best (feature, threshold) by sum-of-squared-error reduction, or
    /// `None` when no split separates the rows.
    fn best_split(&self, rows: &[u32]) -> Option<(SplitPredicate, Vec<u32>, Vec<u32>)> {
        let total_sum: f64 = rows.iter().map(|&r| self.data.targets[r as usize]).sum();
        let total_sq: f64 = rows
            .iter()
            .map(|&r| {
                let t = self.data.targets[r as usize];
                t * t
            })
            .sum();
        let n = rows.len() as f64;
        let base_sse = total_sq - total_sum * total_sum / n;

        let mut best: Option<(f64, SplitPredicate)> = None;
        for feature in 0..self.data.num_features() {
            let col = &self.data.columns[feature];
            let mut order: Vec<u32> = rows.to_vec();
            order.sort_by(|&a, &b| {
                col[a as usize]
                    .partial_cmp(&col[b as usize])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for i in 0..order.len() - 1 {
                let t = self.data.targets[order[i] as usize];
                left_sum += t;
                left_sq += t * t;

                let here = col[order[i] as usize];
                let next = col[order[i + 1] as usize];
                if here == next {
                    continue; // no threshold separates equal values
                }
                let left_n = (i + 1) as f64;
                let right_n = n - left_n;
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / left_n)
                    + (right_sq - right_sum * right_sum / right_n);
                let gain = base_sse - sse;
                let threshold = (here + next) / 2.0;
                if best.is_none() || gain > best.as_ref().map(|(g, _)| *g).unwrap_or(f64::MIN) {
                    best = Some((gain, SplitPredicate::new(feature as u32, threshold)));
                }
            }
        }

        let (gain, predicate) = best?;
        if gain <= 1e-12 {
            return None;
        }
        let mut left = Vec::new();
        let mut right = Vec::new();
        for &r in rows {
            if predicate.go_left(self.data.columns[predicate.feature as usize][r as usize]) {
                left.push(r);
            } else {
                right.push(r);
            }
        }
        if left.is_empty() || right.is_empty() {
            return None;
        }
        Some((predicate, left, right))
    }

    fn register(&self, rows: Vec<u32>) -> SubsetRef {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let num_rows = rows.len() as u64;
        self.subsets.lock().unwrap().insert(token, Arc::new(rows));
        SubsetRef::new(token, num_rows)
    }
}

impl SplitEvaluator for VarianceEvaluator {
    fn evaluate(&self, subset: &SubsetRef) -> Result<Decision, EvalError> {
        if let Some(decision) = self.decisions.lock().unwrap().get(&subset.token()) {
            return Ok(decision.clone());
        }

        let rows = self.rows_for(subset)?;
        let decision = if rows.len() < self.min_rows_to_split {
            Decision::Leaf {
                prediction: self.mean(&rows),
            }
        } else {
            match self.best_split(&rows) {
                Some((predicate, left, right)) => Decision::Split {
                    predicate,
                    left: self.register(left),
                    right: self.register(right),
                },
                None => Decision::Leaf {
                    prediction: self.mean(&rows),
                },
            }
        };

        self.decisions
            .lock()
            .unwrap()
            .insert(subset.token(), decision.clone());
        Ok(decision)
    }

    fn fallback_leaf(&self, subset: &SubsetRef) -> f64 {
        match self.rows_for(subset) {
            Ok(rows) => self.mean(&rows),
            Err(_) => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_evaluator_replays_its_script() {
        let mut evaluator = ScriptedEvaluator::new(-1.0);
        evaluator.leaf(3, 2.0);
        evaluator.split(0, 1, 0.5, (3, 4), (4, 6));

        let root = evaluator.evaluate(&SubsetRef::root(10)).unwrap();
        assert!(matches!(root, Decision::Split { .. }));
        let leaf = evaluator.evaluate(&SubsetRef::new(3, 4)).unwrap();
        assert_eq!(leaf, Decision::Leaf { prediction: 2.0 });

        let err = evaluator.evaluate(&SubsetRef::new(9, 1)).unwrap_err();
        assert_eq!(err, EvalError::UnknownSubset { token: 9 });
        assert_eq!(evaluator.fallback_leaf(&SubsetRef::new(9, 1)), -1.0);
    }

    #[test]
    fn variance_evaluator_finds_the_obvious_split() {
        // Feature 0 separates targets perfectly at 0.5.
        let columns = vec![vec![0.1, 0.2, 0.3, 0.7, 0.8, 0.9]];
        let targets = vec![-1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
        let evaluator = VarianceEvaluator::new(InMemoryDataset::new(columns, targets));

        let decision = evaluator.evaluate(&SubsetRef::root(6)).unwrap();
        match decision {
            Decision::Split {
                predicate,
                left,
                right,
            } => {
                assert_eq!(predicate.feature, 0);
                approx::assert_abs_diff_eq!(predicate.threshold, 0.5, epsilon = 0.01);
                assert_eq!(left.num_rows(), 3);
                assert_eq!(right.num_rows(), 3);
            }
            other => panic!("expected a split, got {other:?}"),
        }
    }

    #[test]
    fn variance_evaluator_is_deterministic_per_token() {
        let data = InMemoryDataset::synthetic(64, 3, 42);
        let evaluator = VarianceEvaluator::new(data);

        let first = evaluator.evaluate(&SubsetRef::root(64)).unwrap();
        let second = evaluator.evaluate(&SubsetRef::root(64)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn pure_subsets_resolve_to_leaves() {
        let columns = vec![vec![0.5, 0.5, 0.5]];
        let targets = vec![2.0, 2.0, 2.0];
        let evaluator = VarianceEvaluator::new(InMemoryDataset::new(columns, targets));

        let decision = evaluator.evaluate(&SubsetRef::root(3)).unwrap();
        assert_eq!(decision, Decision::Leaf { prediction: 2.0 });
    }

    #[test]
    fn fallback_leaf_is_the_subset_mean() {
        let columns = vec![vec![0.0, 1.0]];
        let targets = vec![1.0, 3.0];
        let evaluator = VarianceEvaluator::new(InMemoryDataset::new(columns, targets));
        assert_eq!(evaluator.fallback_leaf(&SubsetRef::root(2)), 2.0);
    }

    #[test]
    fn csv_loader_splits_features_and_target() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "0.1,0.5,1.0").unwrap();
        writeln!(file, "0.9,0.4,3.0").unwrap();

        let data = InMemoryDataset::from_csv(&path).unwrap();
        assert_eq!(data.num_rows(), 2);
        assert_eq!(data.num_features(), 2);
        assert_eq!(data.row(1), vec![0.9, 0.4]);
        assert_eq!(data.targets[1], 3.0);
    }

    #[test]
    fn csv_loader_rejects_ragged_rows() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "0.1,0.5,1.0").unwrap();
        writeln!(file, "0.9,3.0").unwrap();

        assert!(InMemoryDataset::from_csv(&path).is_err());
    }

    #[test]
    fn synthetic_data_is_seed_stable() {
        let a = InMemoryDataset::synthetic(32, 2, 7);
        let b = InMemoryDataset::synthetic(32, 2, 7);
        assert_eq!(a.row(5), b.row(5));
        assert_eq!(a.num_rows(), 32);
        assert_eq!(a.num_features(), 2);
    }
}

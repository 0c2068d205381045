use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::types::{SpecError, SpecResult};

/// Train/validation partitioning method
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SplitMethod {
    /// One split with `test_size` fraction held out
    Holdout,
    /// Standard k-fold cross-validation
    KFold,
}

impl std::str::FromStr for SplitMethod {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "holdout" => Ok(SplitMethod::Holdout),
            "kfold" => Ok(SplitMethod::KFold),
            _ => Err(SpecError::Configuration(format!(
                "Unknown split method: {}. Supported: holdout, kfold",
                s
            ))),
        }
    }
}

/// Splitting parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitParams {
    pub method: SplitMethod,
    /// Number of folds (kfold only)
    pub k_folds: usize,
    /// Held-out fraction (holdout only)
    pub test_size: f32,
    pub random_state: u64,
}

impl Default for SplitParams {
    fn default() -> Self {
        Self {
            method: SplitMethod::Holdout,
            k_folds: 5,
            test_size: 0.2,
            random_state: 0,
        }
    }
}

/// One train/test partition with original-index provenance.
#[derive(Debug, Clone)]
pub struct DataSplit {
    pub x_train: Array2<f32>,
    pub x_test: Array2<f32>,
    pub y_train: Array1<f32>,
    pub y_test: Array1<f32>,
    /// Row indices of the training samples in the original dataset
    pub train_indices: Vec<usize>,
    /// Row indices of the test samples in the original dataset
    pub test_indices: Vec<usize>,
}

/// Produces train/validation partitions via holdout or k-fold.
pub struct DatasetSplitter {
    params: SplitParams,
}

impl DatasetSplitter {
    pub fn new(params: SplitParams) -> Self {
        Self { params }
    }

    pub fn split(&self, x: &Array2<f32>, y: &Array1<f32>) -> SpecResult<Vec<DataSplit>> {
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(SpecError::Processing(format!(
                "Feature matrix has {} rows but target vector has {} entries",
                n_samples,
                y.len()
            )));
        }
        if n_samples < 2 {
            return Err(SpecError::Processing(format!(
                "Cannot split a dataset of {} samples",
                n_samples
            )));
        }

        let mut indices: Vec<usize> = (0..n_samples).collect();
        let mut rng = StdRng::seed_from_u64(self.params.random_state);
        indices.shuffle(&mut rng);

        match self.params.method {
            SplitMethod::Holdout => {
                if !(0.0..1.0).contains(&self.params.test_size) || self.params.test_size <= 0.0 {
                    return Err(SpecError::Configuration(format!(
                        "Holdout test_size must be in (0, 1), got {}",
                        self.params.test_size
                    )));
                }
                let n_test = ((n_samples as f32 * self.params.test_size).round() as usize)
                    .clamp(1, n_samples - 1);
                let test_indices = indices[..n_test].to_vec();
                let train_indices = indices[n_test..].to_vec();
                log::debug!(
                    "Holdout split: {} training / {} test samples",
                    train_indices.len(),
                    test_indices.len()
                );
                Ok(vec![make_split(x, y, train_indices, test_indices)])
            }
            SplitMethod::KFold => {
                let k = self.params.k_folds;
                if k < 2 || k > n_samples {
                    return Err(SpecError::Configuration(format!(
                        "k_folds must be between 2 and the sample count, got {}",
                        k
                    )));
                }
                log::debug!("{}-fold split over {} samples", k, n_samples);
                let mut splits = Vec::with_capacity(k);
                for fold in 0..k {
                    // Fold boundaries distribute the remainder over the first folds
                    let start = fold * n_samples / k;
                    let end = (fold + 1) * n_samples / k;
                    let test_indices = indices[start..end].to_vec();
                    let train_indices: Vec<usize> = indices[..start]
                        .iter()
                        .chain(indices[end..].iter())
                        .copied()
                        .collect();
                    splits.push(make_split(x, y, train_indices, test_indices));
                }
                Ok(splits)
            }
        }
    }
}

fn make_split(
    x: &Array2<f32>,
    y: &Array1<f32>,
    train_indices: Vec<usize>,
    test_indices: Vec<usize>,
) -> DataSplit {
    DataSplit {
        x_train: x.select(Axis(0), &train_indices),
        x_test: x.select(Axis(0), &test_indices),
        y_train: y.select(Axis(0), &train_indices),
        y_test: y.select(Axis(0), &test_indices),
        train_indices,
        test_indices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn dataset(n: usize) -> (Array2<f32>, Array1<f32>) {
        let x = Array2::from_shape_fn((n, 3), |(r, c)| (r * 3 + c) as f32);
        let y = Array1::from_shape_fn(n, |r| r as f32);
        (x, y)
    }

    #[test]
    fn test_holdout_sizes_and_provenance() {
        let (x, y) = dataset(20);
        let splitter = DatasetSplitter::new(SplitParams {
            method: SplitMethod::Holdout,
            test_size: 0.25,
            random_state: 1,
            ..Default::default()
        });
        let splits = splitter.split(&x, &y).unwrap();
        assert_eq!(splits.len(), 1);
        let s = &splits[0];
        assert_eq!(s.test_indices.len(), 5);
        assert_eq!(s.train_indices.len(), 15);
        // Provenance maps back to the original rows
        for (row, &idx) in s.test_indices.iter().enumerate() {
            assert_eq!(s.y_test[row], idx as f32);
        }
    }

    #[test]
    fn test_kfold_disjoint_cover() {
        let (x, y) = dataset(23);
        let splitter = DatasetSplitter::new(SplitParams {
            method: SplitMethod::KFold,
            k_folds: 5,
            random_state: 3,
            ..Default::default()
        });
        let splits = splitter.split(&x, &y).unwrap();
        assert_eq!(splits.len(), 5);

        let mut all_test: Vec<usize> = splits
            .iter()
            .flat_map(|s| s.test_indices.iter().copied())
            .collect();
        all_test.sort_unstable();
        let expected: Vec<usize> = (0..23).collect();
        assert_eq!(all_test, expected, "test folds must cover every sample once");

        for s in &splits {
            assert_eq!(s.train_indices.len() + s.test_indices.len(), 23);
            for idx in &s.test_indices {
                assert!(!s.train_indices.contains(idx));
            }
        }
    }

    #[test]
    fn test_same_seed_same_split() {
        let (x, y) = dataset(10);
        let params = SplitParams {
            method: SplitMethod::Holdout,
            test_size: 0.3,
            random_state: 9,
            ..Default::default()
        };
        let a = DatasetSplitter::new(params).split(&x, &y).unwrap();
        let b = DatasetSplitter::new(params).split(&x, &y).unwrap();
        assert_eq!(a[0].train_indices, b[0].train_indices);
    }

    #[test]
    fn test_invalid_configuration() {
        let (x, y) = dataset(10);
        let bad_folds = SplitParams {
            method: SplitMethod::KFold,
            k_folds: 1,
            ..Default::default()
        };
        assert!(DatasetSplitter::new(bad_folds).split(&x, &y).is_err());
        assert!("stratified".parse::<SplitMethod>().is_err());
    }
}

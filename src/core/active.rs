use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::core::model::{rmse, Regressor, RegressorConfig};
use crate::types::{SpecError, SpecResult};

/// Strategy used to pick the next batch of training samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum QueryStrategy {
    /// Euclidean boundary/distance: unlabeled points with the globally
    /// largest distances to the labeled set
    Ebd,
    /// Pool-based ensemble variance: unlabeled points where an ensemble
    /// of models trained on random subsets disagrees most
    Pal,
}

impl std::str::FromStr for QueryStrategy {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ebd" => Ok(QueryStrategy::Ebd),
            "pal" => Ok(QueryStrategy::Pal),
            _ => Err(SpecError::Configuration(format!(
                "Unknown query strategy: {}. Supported: ebd, pal",
                s
            ))),
        }
    }
}

/// Active-learning loop parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveLearningParams {
    pub strategy: QueryStrategy,
    /// Initial random subset as a percentage of the training pool
    pub init_pct: f32,
    /// Samples queried per iteration
    pub batch_size: usize,
    /// Ensemble size k (PAL only)
    pub ensemble_size: usize,
    /// Worker count for the PAL ensemble fits
    pub n_jobs: usize,
    pub seed: u64,
}

impl Default for ActiveLearningParams {
    fn default() -> Self {
        Self {
            strategy: QueryStrategy::Ebd,
            init_pct: 10.0,
            batch_size: 5,
            ensemble_size: 4,
            n_jobs: 4,
            seed: 0,
        }
    }
}

/// Outcome of one active-learning run.
#[derive(Debug, Clone)]
pub struct ActiveLearningResult {
    /// Model refitted on the final accepted training set
    pub regressor: Regressor,
    /// Accepted pool-row indices: the initial seed plus every accepted
    /// batch, in selection order
    pub training_indices: Vec<usize>,
    /// Validation RMSE after initialization and after each accepted step
    pub trajectory: Vec<f32>,
    /// Best (lowest) validation RMSE reached
    pub best_score: f32,
}

/// Iterative sample-selection engine.
///
/// Grows a labeled training subset from a random seed by repeatedly
/// querying the most informative unlabeled pool samples, refitting, and
/// keeping only batches that do not worsen the validation RMSE. Rejected
/// batches are removed from the pool but never enter the training set.
pub struct ActiveLearningLoop {
    params: ActiveLearningParams,
}

impl ActiveLearningLoop {
    pub fn new(params: ActiveLearningParams) -> Self {
        Self { params }
    }

    pub fn run(
        &self,
        x_pool: &Array2<f32>,
        y_pool: &Array1<f32>,
        x_val: &Array2<f32>,
        y_val: &Array1<f32>,
        config: &RegressorConfig,
    ) -> SpecResult<ActiveLearningResult> {
        let n_samples = x_pool.nrows();
        if n_samples != y_pool.len() {
            return Err(SpecError::Processing(format!(
                "Training pool has {} rows but {} targets",
                n_samples,
                y_pool.len()
            )));
        }
        let n_init = ((self.params.init_pct / 100.0 * n_samples as f32).round() as usize)
            .clamp(1, n_samples);

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut pool: Vec<usize> = (0..n_samples).collect();
        pool.shuffle(&mut rng);
        let mut labeled: Vec<usize> = pool[..n_init].to_vec();
        let mut unlabeled: Vec<usize> = pool[n_init..].to_vec();
        let initial_unlabeled = unlabeled.len();

        log::info!(
            "Active learning ({:?}): {} pool samples, {} initial, batch size {}",
            self.params.strategy,
            n_samples,
            n_init,
            self.params.batch_size
        );

        let mut regressor = Regressor::new(config);
        regressor.fit(
            &x_pool.select(Axis(0), &labeled),
            &y_pool.select(Axis(0), &labeled),
        )?;
        let mut best_score = rmse(&regressor.predict(x_val)?, y_val);
        let mut trajectory = vec![best_score];
        log::debug!("Initial validation RMSE: {:.6}", best_score);

        let mut last_progress_pct = 0usize;

        while !unlabeled.is_empty() {
            let batch_len = self.params.batch_size.min(unlabeled.len());
            let query_positions = match self.params.strategy {
                QueryStrategy::Ebd => {
                    self.query_ebd(x_pool, &labeled, &unlabeled, batch_len)
                }
                QueryStrategy::Pal => {
                    self.query_pal(x_pool, y_pool, &labeled, &unlabeled, batch_len, config)?
                }
            };

            // Queried samples leave the pool whether or not they are kept
            let mut query_rows = Vec::with_capacity(query_positions.len());
            let mut positions = query_positions;
            positions.sort_unstable_by(|a, b| b.cmp(a));
            for pos in positions {
                query_rows.push(unlabeled.swap_remove(pos));
            }

            labeled.extend(query_rows.iter().copied());
            regressor.fit(
                &x_pool.select(Axis(0), &labeled),
                &y_pool.select(Axis(0), &labeled),
            )?;
            let score = rmse(&regressor.predict(x_val)?, y_val);

            if score > best_score {
                // Roll back exactly the rows appended by this query
                labeled.truncate(labeled.len() - query_rows.len());
                log::debug!(
                    "Rejected batch of {} (RMSE {:.6} > best {:.6})",
                    query_rows.len(),
                    score,
                    best_score
                );
            } else {
                best_score = score;
                trajectory.push(score);
                log::debug!(
                    "Accepted batch of {} (RMSE {:.6}, {} training samples)",
                    query_rows.len(),
                    score,
                    labeled.len()
                );
            }

            // Progress in 5% steps of pool consumption
            let consumed = initial_unlabeled - unlabeled.len();
            let pct = if initial_unlabeled == 0 {
                100
            } else {
                consumed * 100 / initial_unlabeled
            };
            if pct / 5 > last_progress_pct / 5 {
                log::info!("Active learning progress: {}% of pool consumed", (pct / 5) * 5);
                last_progress_pct = pct;
            }
        }

        // The last fit may reflect a rejected batch; refit on the accepted set
        regressor.fit(
            &x_pool.select(Axis(0), &labeled),
            &y_pool.select(Axis(0), &labeled),
        )?;

        log::info!(
            "Active learning finished: {} of {} samples accepted, best RMSE {:.6}",
            labeled.len(),
            n_samples,
            best_score
        );

        Ok(ActiveLearningResult {
            regressor,
            training_indices: labeled,
            trajectory,
            best_score,
        })
    }

    /// Farthest-distance query over the flattened pairwise distance matrix.
    ///
    /// Deliberately keeps the global top-n over all (unlabeled, labeled)
    /// pairs rather than reducing to each point's minimum distance first,
    /// so results stay compatible with previously trained models.
    fn query_ebd(
        &self,
        x_pool: &Array2<f32>,
        labeled: &[usize],
        unlabeled: &[usize],
        batch_len: usize,
    ) -> Vec<usize> {
        let mut pairs: Vec<(f32, usize)> = Vec::with_capacity(unlabeled.len() * labeled.len());
        for (u_pos, &u_row) in unlabeled.iter().enumerate() {
            let u = x_pool.row(u_row);
            for &l_row in labeled {
                let l = x_pool.row(l_row);
                let d: f32 = u
                    .iter()
                    .zip(l.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                pairs.push((d, u_pos));
            }
        }
        pairs.sort_unstable_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut selected = Vec::with_capacity(batch_len);
        for (_, u_pos) in pairs {
            if !selected.contains(&u_pos) {
                selected.push(u_pos);
                if selected.len() == batch_len {
                    break;
                }
            }
        }
        selected
    }

    /// Ensemble-variance query: k models on random labeled subsets, pick
    /// the unlabeled points with the highest prediction variance.
    fn query_pal(
        &self,
        x_pool: &Array2<f32>,
        y_pool: &Array1<f32>,
        labeled: &[usize],
        unlabeled: &[usize],
        batch_len: usize,
        config: &RegressorConfig,
    ) -> SpecResult<Vec<usize>> {
        let k = self.params.ensemble_size.max(2);
        let subset_size = (labeled.len() / k).max(2).min(labeled.len());
        let x_unlabeled = x_pool.select(Axis(0), unlabeled);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.n_jobs.max(1))
            .build()
            .map_err(|e| SpecError::Processing(format!("Worker pool setup failed: {}", e)))?;

        // Each member gets its own seeded subset; results join positionally
        let predictions: Vec<SpecResult<Array1<f32>>> = pool.install(|| {
            use rayon::prelude::*;
            (0..k)
                .into_par_iter()
                .map(|rep| {
                    let mut rng =
                        StdRng::seed_from_u64(self.params.seed ^ (rep as u64).wrapping_mul(0x9e37));
                    let mut subset = labeled.to_vec();
                    subset.shuffle(&mut rng);
                    subset.truncate(subset_size);

                    let mut member = Regressor::new(config);
                    member.fit(
                        &x_pool.select(Axis(0), &subset),
                        &y_pool.select(Axis(0), &subset),
                    )?;
                    member.predict(&x_unlabeled)
                })
                .collect()
        });

        let predictions: Vec<Array1<f32>> =
            predictions.into_iter().collect::<SpecResult<Vec<_>>>()?;

        let mut variances: Vec<(f32, usize)> = (0..unlabeled.len())
            .map(|i| {
                let mean: f32 =
                    predictions.iter().map(|p| p[i]).sum::<f32>() / predictions.len() as f32;
                let var: f32 = predictions
                    .iter()
                    .map(|p| (p[i] - mean) * (p[i] - mean))
                    .sum::<f32>()
                    / predictions.len() as f32;
                (var, i)
            })
            .collect();
        variances
            .sort_unstable_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(variances[..batch_len].iter().map(|&(_, i)| i).collect())
    }
}

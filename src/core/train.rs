use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::{s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::core::active::{ActiveLearningLoop, ActiveLearningParams};
use crate::core::model::{
    rmse, FittedModel, Pca, Preprocessing, Regressor, RegressorConfig, Scaler,
};
use crate::core::noise::{NoiseInjector, NoiseParams};
use crate::core::split::{DatasetSplitter, SplitParams};
use crate::io::lut::LutDataset;
use crate::io::meta::ModelMeta;
use crate::types::{SpecError, SpecResult};

/// Optional hook receiving intermediate training matrices for inspection.
pub type DiagnosticHook = Box<dyn Fn(&str, &Array2<f32>) + Send + Sync>;

/// The six mutually exclusive ways a model can be trained.
#[derive(Debug, Clone)]
pub enum TrainingMode {
    /// Fit once on the full training pool
    SingleFit,
    /// Fit on a train partition, report RMSE on the held-out partition
    SplitEval { split: SplitParams },
    /// Cross-validated hyper-parameter search over candidate configs;
    /// `randomized` limits the search to a seeded random subset
    HyperSearch {
        candidates: Vec<RegressorConfig>,
        randomized: Option<usize>,
        split: SplitParams,
    },
    /// Active learning over internally generated train/validation splits
    ActiveInternal {
        split: SplitParams,
        al: ActiveLearningParams,
    },
    /// Active learning against externally supplied reference measurements
    ActiveExternal {
        al: ActiveLearningParams,
        x_reference: Array2<f32>,
        y_reference: Array1<f32>,
    },
    /// Refit from a previously persisted preprocessing file, reusing its
    /// saved training indices instead of redrawing them
    Retrain { processing_path: PathBuf },
}

impl TrainingMode {
    fn uses_active_learning(&self) -> bool {
        matches!(
            self,
            TrainingMode::ActiveInternal { .. } | TrainingMode::ActiveExternal { .. }
        )
    }
}

/// Immutable description of one training run.
///
/// Constructed once per invocation and passed down; orchestration never
/// mutates it.
pub struct TrainingPlan {
    pub regressor: RegressorConfig,
    pub mode: TrainingMode,
    pub noise: NoiseParams,
    /// Standardize spectra before fitting
    pub use_scaler: bool,
    /// Number of PCA components, 0 disables PCA
    pub pca_components: usize,
    /// Optional bare-soil spectra appended to the pool with zero-valued
    /// parameters
    pub soil_spectra: Option<Array2<f32>>,
    /// Zero-based spectral band indices excluded from model features
    pub excluded_bands: Vec<usize>,
    pub seed: u64,
}

impl Default for TrainingPlan {
    fn default() -> Self {
        Self {
            regressor: RegressorConfig::default(),
            mode: TrainingMode::SingleFit,
            noise: NoiseParams::default(),
            use_scaler: true,
            pca_components: 0,
            soil_spectra: None,
            excluded_bands: Vec::new(),
            seed: 0,
        }
    }
}

/// Record of one trained (geometry ensemble, target parameter) model.
#[derive(Debug, Clone)]
pub struct TrainedModelRecord {
    pub model_index: usize,
    pub target_name: String,
    /// Validation RMSE, when the mode evaluates one
    pub score: Option<f32>,
    /// Active-learning RMSE trajectory, empty otherwise
    pub trajectory: Vec<f32>,
    pub model_path: PathBuf,
    pub processing_path: PathBuf,
}

/// Summary of a full training run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub records: Vec<TrainedModelRecord>,
    pub meta_path: PathBuf,
}

/// Path of a persisted model for one (ensemble, target) pair.
pub fn model_path(dir: &Path, name: &str, model_index: usize, target: &str) -> PathBuf {
    dir.join(format!("{}_{}_{}.model", name, model_index, sanitize(target)))
}

/// Path of the companion preprocessing file.
pub fn processing_path(dir: &Path, name: &str, model_index: usize, target: &str) -> PathBuf {
    dir.join(format!("{}_{}_{}.proc", name, model_index, sanitize(target)))
}

/// Path of the human-readable model metafile.
pub fn model_meta_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}_model.meta", name))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Wires noise injection, splitting and model fitting together and
/// persists one model per geometry ensemble and target parameter.
pub struct TrainingOrchestrator {
    plan: TrainingPlan,
    diagnostic: Option<DiagnosticHook>,
}

impl TrainingOrchestrator {
    pub fn new(plan: TrainingPlan) -> Self {
        Self {
            plan,
            diagnostic: None,
        }
    }

    /// Attach a hook that receives intermediate matrices (e.g. noisy
    /// spectra) during training.
    pub fn with_diagnostic_hook(mut self, hook: DiagnosticHook) -> Self {
        self.diagnostic = Some(hook);
        self
    }

    /// Train models for every geometry ensemble and target parameter of
    /// the LUT and persist them under `output_dir`.
    ///
    /// The cancellation flag is polled between geometry ensembles; models
    /// persisted before cancellation remain valid on disk.
    pub fn train_and_dump<P: AsRef<Path>>(
        &self,
        lut: &LutDataset,
        output_dir: P,
        cancel: Option<&AtomicBool>,
    ) -> SpecResult<TrainingReport> {
        let output_dir = output_dir.as_ref();
        std::fs::create_dir_all(output_dir)?;

        let meta = &lut.meta;
        let n_ensembles = meta.geometry.model_count();
        log::info!(
            "Training '{}' models for {} geometry ensembles x {} parameters ({} mode)",
            self.plan.regressor.name(),
            n_ensembles,
            meta.parameter_names.len(),
            mode_name(&self.plan.mode)
        );

        let mut records = Vec::new();
        let mut best_hyperparameters = String::new();

        for model_index in 0..n_ensembles {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    log::warn!(
                        "Training cancelled after {} of {} geometry ensembles",
                        model_index,
                        n_ensembles
                    );
                    return Err(SpecError::Cancelled);
                }
            }

            let samples = lut.load_samples(model_index)?;
            let spectra = drop_columns(&samples.spectra, &self.plan.excluded_bands);

            let injector = NoiseInjector::new(
                NoiseParams {
                    conversion_factor: meta.conversion_factor,
                    ..self.plan.noise
                },
                self.plan.seed ^ model_index as u64,
            );
            let mut spectra = injector.apply(&spectra)?;
            if let Some(hook) = &self.diagnostic {
                hook("noisy_spectra", &spectra);
            }

            // Bare-soil augmentation: extra rows with all parameters at zero
            let mut parameters = samples.parameters.clone();
            if let Some(soil) = &self.plan.soil_spectra {
                let soil = drop_columns(soil, &self.plan.excluded_bands);
                if soil.ncols() != spectra.ncols() {
                    return Err(SpecError::Configuration(format!(
                        "Soil spectra have {} bands, LUT spectra have {}",
                        soil.ncols(),
                        spectra.ncols()
                    )));
                }
                spectra = stack_rows(&spectra, &soil);
                parameters = stack_rows(
                    &parameters,
                    &Array2::zeros((soil.nrows(), parameters.ncols())),
                );
            }

            let scaler = if self.plan.use_scaler {
                Some(Scaler::fit(&spectra)?)
            } else {
                None
            };
            let scaled = match &scaler {
                Some(s) => s.transform(&spectra),
                None => spectra.clone(),
            };
            let pca = if self.plan.pca_components > 0 {
                Some(Pca::fit(&scaled, self.plan.pca_components)?)
            } else {
                None
            };
            let features = match &pca {
                Some(p) => p.transform(&scaled),
                None => scaled,
            };

            let feature_names = feature_names(meta, &self.plan.excluded_bands);

            for (param_idx, target_name) in meta.parameter_names.iter().enumerate() {
                let y = parameters.column(param_idx).to_owned();
                let outcome = self.run_mode(&features, &y, model_index, target_name)?;

                let model = FittedModel {
                    regressor: outcome.regressor,
                    feature_names: feature_names.clone(),
                    target_name: target_name.clone(),
                };
                let processing = Preprocessing {
                    scaler: scaler.clone(),
                    pca: pca.clone(),
                    al_training_indices: outcome.al_training_indices,
                    split_training_indices: outcome.split_training_indices,
                    test_indices: outcome.test_indices,
                };

                let m_path = model_path(output_dir, &meta.name, model_index, target_name);
                let p_path = processing_path(output_dir, &meta.name, model_index, target_name);
                model.save(&m_path)?;
                processing.save(&p_path)?;

                if !outcome.best_hyperparameters.is_empty() {
                    best_hyperparameters = outcome.best_hyperparameters.clone();
                }

                records.push(TrainedModelRecord {
                    model_index,
                    target_name: target_name.clone(),
                    score: outcome.score,
                    trajectory: outcome.trajectory,
                    model_path: m_path,
                    processing_path: p_path,
                });
            }

            log::info!(
                "Geometry ensemble {}/{} trained",
                model_index + 1,
                n_ensembles
            );
        }

        let model_meta = ModelMeta {
            algorithm: self.plan.regressor.name().to_string(),
            noise_kind: format!("{:?}", self.plan.noise.kind).to_lowercase(),
            noise_level: self.plan.noise.sigma_pct,
            pca_components: self.plan.pca_components,
            scaler: if self.plan.use_scaler {
                "standard(mean/std)".to_string()
            } else {
                String::new()
            },
            target_names: meta.parameter_names.clone(),
            geometry: meta.geometry.clone(),
            excluded_bands: self.plan.excluded_bands.clone(),
            active_learning: self.plan.mode.uses_active_learning(),
            best_hyperparameters,
        };
        let meta_path = model_meta_path(output_dir, &meta.name);
        model_meta.write(&meta_path)?;

        log::info!(
            "Training complete: {} models persisted to {}",
            records.len(),
            output_dir.display()
        );
        Ok(TrainingReport { records, meta_path })
    }

    fn run_mode(
        &self,
        x: &Array2<f32>,
        y: &Array1<f32>,
        model_index: usize,
        target_name: &str,
    ) -> SpecResult<ModeOutcome> {
        match &self.plan.mode {
            TrainingMode::SingleFit => {
                let mut regressor = Regressor::new(&self.plan.regressor);
                regressor.fit(x, y)?;
                Ok(ModeOutcome::fitted(regressor))
            }

            TrainingMode::SplitEval { split } => {
                let splits = DatasetSplitter::new(*split).split(x, y)?;
                let mut scores = Vec::with_capacity(splits.len());
                for s in &splits {
                    let mut member = Regressor::new(&self.plan.regressor);
                    member.fit(&s.x_train, &s.y_train)?;
                    scores.push(rmse(&member.predict(&s.x_test)?, &s.y_test));
                }
                let mean_score = scores.iter().sum::<f32>() / scores.len() as f32;
                log::info!(
                    "Split evaluation of '{}' (ensemble {}): mean RMSE {:.6} over {} split(s)",
                    target_name,
                    model_index,
                    mean_score,
                    scores.len()
                );

                // Persist the model trained on the first split's partition
                let first = &splits[0];
                let mut regressor = Regressor::new(&self.plan.regressor);
                regressor.fit(&first.x_train, &first.y_train)?;
                Ok(ModeOutcome {
                    regressor,
                    score: Some(mean_score),
                    trajectory: Vec::new(),
                    al_training_indices: None,
                    split_training_indices: Some(first.train_indices.clone()),
                    test_indices: Some(first.test_indices.clone()),
                    best_hyperparameters: String::new(),
                })
            }

            TrainingMode::HyperSearch {
                candidates,
                randomized,
                split,
            } => {
                if candidates.is_empty() {
                    return Err(SpecError::Configuration(
                        "Hyper-parameter search requires at least one candidate".to_string(),
                    ));
                }
                let mut pool: Vec<&RegressorConfig> = candidates.iter().collect();
                if let Some(n) = randomized {
                    let mut rng = StdRng::seed_from_u64(self.plan.seed);
                    pool.shuffle(&mut rng);
                    pool.truncate((*n).max(1));
                }

                let splits = DatasetSplitter::new(*split).split(x, y)?;
                let mut best: Option<(f32, RegressorConfig)> = None;
                for candidate in pool {
                    let mut scores = Vec::with_capacity(splits.len());
                    for s in &splits {
                        let mut member = Regressor::new(candidate);
                        member.fit(&s.x_train, &s.y_train)?;
                        scores.push(rmse(&member.predict(&s.x_test)?, &s.y_test));
                    }
                    let mean = scores.iter().sum::<f32>() / scores.len() as f32;
                    log::debug!("Candidate {:?}: mean RMSE {:.6}", candidate, mean);
                    if best.as_ref().map_or(true, |(b, _)| mean < *b) {
                        best = Some((mean, candidate.clone()));
                    }
                }
                let (best_score, best_config) = best.ok_or_else(|| {
                    SpecError::Processing("Hyper-parameter search produced no result".to_string())
                })?;
                log::info!(
                    "Best hyper-parameters for '{}' (ensemble {}): {:?} (RMSE {:.6})",
                    target_name,
                    model_index,
                    best_config,
                    best_score
                );

                let mut regressor = Regressor::new(&best_config);
                regressor.fit(x, y)?;
                Ok(ModeOutcome {
                    regressor,
                    score: Some(best_score),
                    trajectory: Vec::new(),
                    al_training_indices: None,
                    split_training_indices: None,
                    test_indices: None,
                    best_hyperparameters: format!("{:?}", best_config),
                })
            }

            TrainingMode::ActiveInternal { split, al } => {
                let splits = DatasetSplitter::new(*split).split(x, y)?;
                let mut best: Option<(super::active::ActiveLearningResult, Vec<usize>, Vec<usize>)> =
                    None;
                let mut trajectory = Vec::new();
                let mut al_indices: Vec<usize> = Vec::new();
                for (fold, s) in splits.iter().enumerate() {
                    let al_params = ActiveLearningParams {
                        seed: al.seed ^ fold as u64,
                        ..al.clone()
                    };
                    let result = ActiveLearningLoop::new(al_params).run(
                        &s.x_train,
                        &s.y_train,
                        &s.x_test,
                        &s.y_test,
                        &self.plan.regressor,
                    )?;
                    trajectory.extend(result.trajectory.iter().copied());
                    // Map pool-local rows back to original dataset rows and
                    // accumulate across folds; folds share rows, so the
                    // provenance list is de-duplicated
                    for &local in &result.training_indices {
                        let original = s.train_indices[local];
                        if !al_indices.contains(&original) {
                            al_indices.push(original);
                        }
                    }
                    let keep = best
                        .as_ref()
                        .map_or(true, |(b, _, _)| result.best_score < b.best_score);
                    if keep {
                        best = Some((result, s.train_indices.clone(), s.test_indices.clone()));
                    }
                }
                let (result, train_indices, test_indices) = best.ok_or_else(|| {
                    SpecError::Processing("Active learning produced no fold result".to_string())
                })?;

                Ok(ModeOutcome {
                    regressor: result.regressor,
                    score: Some(result.best_score),
                    trajectory,
                    al_training_indices: Some(al_indices),
                    split_training_indices: Some(train_indices),
                    test_indices: Some(test_indices),
                    best_hyperparameters: String::new(),
                })
            }

            TrainingMode::ActiveExternal {
                al,
                x_reference,
                y_reference,
            } => {
                let result = ActiveLearningLoop::new(al.clone()).run(
                    x,
                    y,
                    x_reference,
                    y_reference,
                    &self.plan.regressor,
                )?;
                Ok(ModeOutcome {
                    score: Some(result.best_score),
                    trajectory: result.trajectory.clone(),
                    al_training_indices: Some(result.training_indices.clone()),
                    split_training_indices: None,
                    test_indices: None,
                    best_hyperparameters: String::new(),
                    regressor: result.regressor,
                })
            }

            TrainingMode::Retrain { processing_path } => {
                let saved = Preprocessing::load(processing_path)?;
                let indices = saved
                    .al_training_indices
                    .clone()
                    .or_else(|| saved.split_training_indices.clone())
                    .ok_or_else(|| {
                        SpecError::Configuration(format!(
                            "Processing file {} carries no training indices to retrain from",
                            processing_path.display()
                        ))
                    })?;
                if indices.iter().any(|&i| i >= x.nrows()) {
                    return Err(SpecError::Configuration(format!(
                        "Saved training indices exceed the dataset size {}",
                        x.nrows()
                    )));
                }
                log::info!(
                    "Retraining '{}' (ensemble {}) on {} saved training rows",
                    target_name,
                    model_index,
                    indices.len()
                );
                let mut regressor = Regressor::new(&self.plan.regressor);
                regressor.fit(&x.select(Axis(0), &indices), &y.select(Axis(0), &indices))?;

                let score = saved.test_indices.as_ref().map(|test| {
                    let x_test = x.select(Axis(0), test);
                    let y_test = y.select(Axis(0), test);
                    regressor
                        .predict(&x_test)
                        .map(|p| rmse(&p, &y_test))
                        .unwrap_or(f32::NAN)
                });

                Ok(ModeOutcome {
                    regressor,
                    score,
                    trajectory: Vec::new(),
                    al_training_indices: saved.al_training_indices,
                    split_training_indices: saved.split_training_indices,
                    test_indices: saved.test_indices,
                    best_hyperparameters: String::new(),
                })
            }
        }
    }
}

/// Convenience entry point: train a plan against a LUT and persist the
/// resulting models.
pub fn train_and_dump<P: AsRef<Path>>(
    plan: TrainingPlan,
    lut: &LutDataset,
    output_dir: P,
    cancel: Option<&AtomicBool>,
) -> SpecResult<TrainingReport> {
    TrainingOrchestrator::new(plan).train_and_dump(lut, output_dir, cancel)
}

struct ModeOutcome {
    regressor: Regressor,
    score: Option<f32>,
    trajectory: Vec<f32>,
    al_training_indices: Option<Vec<usize>>,
    split_training_indices: Option<Vec<usize>>,
    test_indices: Option<Vec<usize>>,
    best_hyperparameters: String,
}

impl ModeOutcome {
    fn fitted(regressor: Regressor) -> Self {
        Self {
            regressor,
            score: None,
            trajectory: Vec::new(),
            al_training_indices: None,
            split_training_indices: None,
            test_indices: None,
            best_hyperparameters: String::new(),
        }
    }
}

fn mode_name(mode: &TrainingMode) -> &'static str {
    match mode {
        TrainingMode::SingleFit => "single-fit",
        TrainingMode::SplitEval { .. } => "split-eval",
        TrainingMode::HyperSearch { .. } => "hyper-search",
        TrainingMode::ActiveInternal { .. } => "active-internal",
        TrainingMode::ActiveExternal { .. } => "active-external",
        TrainingMode::Retrain { .. } => "retrain",
    }
}

/// Band display names after exclusion, derived from LUT wavelengths.
pub fn feature_names(meta: &crate::io::lut::LutMeta, excluded: &[usize]) -> Vec<String> {
    meta.wavelengths
        .iter()
        .enumerate()
        .filter(|(i, _)| !excluded.contains(i))
        .map(|(_, wl)| format!("{} nm", wl))
        .collect()
}

fn drop_columns(x: &Array2<f32>, excluded: &[usize]) -> Array2<f32> {
    if excluded.is_empty() {
        return x.clone();
    }
    let keep: Vec<usize> = (0..x.ncols()).filter(|c| !excluded.contains(c)).collect();
    x.select(Axis(1), &keep)
}

fn stack_rows(a: &Array2<f32>, b: &Array2<f32>) -> Array2<f32> {
    let mut out = Array2::zeros((a.nrows() + b.nrows(), a.ncols()));
    out.slice_mut(s![..a.nrows(), ..]).assign(a);
    out.slice_mut(s![a.nrows().., ..]).assign(b);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_drop_columns() {
        let x = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let kept = drop_columns(&x, &[1]);
        assert_eq!(kept, array![[1.0f32, 3.0], [4.0, 6.0]]);
        assert_eq!(drop_columns(&x, &[]), x);
    }

    #[test]
    fn test_stack_rows() {
        let a = array![[1.0f32, 2.0]];
        let b = array![[3.0f32, 4.0], [5.0, 6.0]];
        let stacked = stack_rows(&a, &b);
        assert_eq!(stacked.nrows(), 3);
        assert_eq!(stacked[(2, 1)], 6.0);
    }

    #[test]
    fn test_sanitized_paths() {
        let dir = Path::new("/tmp/out");
        let p = model_path(dir, "lut", 3, "leaf area index");
        assert!(p.to_string_lossy().ends_with("lut_3_leaf_area_index.model"));
    }
}

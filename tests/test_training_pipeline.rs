use std::sync::atomic::{AtomicBool, Ordering};

use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2, Array3};

use specfit::core::active::{ActiveLearningParams, QueryStrategy};
use specfit::core::split::{DatasetSplitter, SplitMethod, SplitParams};
use specfit::core::train::{feature_names, train_and_dump, TrainingMode, TrainingPlan};
use specfit::core::{GeometrySource, InversionParams, Preprocessing};
use specfit::io::lut::{LutDataset, LutMeta, LutSamples};
use specfit::io::raster::MemoryRaster;
use specfit::{
    predict_from_dump, GeometryEnsemble, GeometryGrid, ModelMeta, RegressorConfig, SpecError,
    DEFAULT_NO_DATA,
};

const N_SAMPLES: usize = 100;
const N_BANDS: usize = 6;

/// Four-parameter LUT with spectra that depend linearly on the parameters,
/// so a ridge model can invert them almost exactly.
fn synthetic_lut(dir: &std::path::Path) -> LutDataset {
    let meta = LutMeta {
        name: "synth".to_string(),
        parameter_names: vec![
            "LAI".to_string(),
            "cab".to_string(),
            "cw".to_string(),
            "cm".to_string(),
        ],
        wavelengths: vec![450.0, 550.0, 650.0, 750.0, 850.0, 950.0],
        conversion_factor: 1.0,
        n_splits: 1,
        geometry: GeometryGrid {
            sun_zeniths: vec![45.0],
            view_zeniths: vec![0.0],
            rel_azimuths: vec![0.0],
        },
    };

    let parameters = Array2::from_shape_fn((N_SAMPLES, 4), |(i, p)| {
        0.2 + 0.013 * ((i * (p + 3) + p * 7) % 53) as f32
    });
    let spectra = Array2::from_shape_fn((N_SAMPLES, N_BANDS), |(i, b)| {
        (0..4)
            .map(|p| parameters[(i, p)] * (0.05 + 0.02 * ((b + p) % 4) as f32))
            .sum::<f32>()
    });

    LutDataset::create(dir, meta, &[(0, LutSamples { parameters, spectra })]).unwrap()
}

#[test]
fn test_single_fit_dumps_one_model_per_parameter() {
    let dir = tempfile::tempdir().unwrap();
    let lut = synthetic_lut(dir.path());
    let out = dir.path().join("models");

    let report = train_and_dump(TrainingPlan::default(), &lut, &out, None).unwrap();
    assert_eq!(report.records.len(), 4);

    for record in &report.records {
        assert!(record.model_path.exists(), "missing {:?}", record.model_path);
        assert!(record.processing_path.exists());
        assert_eq!(record.model_index, 0);
    }

    let meta = ModelMeta::read(&report.meta_path).unwrap();
    assert_eq!(meta.target_names.len(), 4);
    assert_eq!(meta.algorithm, "ridge");
    assert_eq!(meta.geometry.sun_zeniths, vec![45.0]);
    assert_eq!(meta.geometry.view_zeniths, vec![0.0]);
    assert_eq!(meta.geometry.rel_azimuths, vec![0.0]);
    assert!(!meta.active_learning);
}

#[test]
fn test_split_eval_reports_finite_scores() {
    let dir = tempfile::tempdir().unwrap();
    let lut = synthetic_lut(dir.path());
    let plan = TrainingPlan {
        mode: TrainingMode::SplitEval {
            split: SplitParams {
                method: SplitMethod::KFold,
                k_folds: 3,
                random_state: 1,
                ..Default::default()
            },
        },
        ..Default::default()
    };

    let report = train_and_dump(plan, &lut, dir.path().join("models"), None).unwrap();
    for record in &report.records {
        let score = record.score.expect("split evaluation must report a score");
        assert!(score.is_finite());
        // Linear spectra, linear model: near-exact inversion
        assert!(score < 0.05, "RMSE {} too high for {}", score, record.target_name);

        let processing = Preprocessing::load(&record.processing_path).unwrap();
        let train = processing.split_training_indices.unwrap();
        let test = processing.test_indices.unwrap();
        assert_eq!(train.len() + test.len(), N_SAMPLES);
    }
}

#[test]
fn test_hyper_search_records_best_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let lut = synthetic_lut(dir.path());
    let plan = TrainingPlan {
        mode: TrainingMode::HyperSearch {
            candidates: vec![
                RegressorConfig::Ridge { alpha: 1e-4 },
                RegressorConfig::Ridge { alpha: 100.0 },
            ],
            randomized: None,
            split: SplitParams::default(),
        },
        ..Default::default()
    };

    let report = train_and_dump(plan, &lut, dir.path().join("models"), None).unwrap();
    let meta = ModelMeta::read(&report.meta_path).unwrap();
    // Heavy regularization on a near-noiseless linear problem always loses
    assert!(meta.best_hyperparameters.contains("Ridge"));
    assert!(!meta.best_hyperparameters.contains("100"));
}

#[test]
fn test_active_learning_persists_training_indices() {
    let dir = tempfile::tempdir().unwrap();
    let lut = synthetic_lut(dir.path());
    let plan = TrainingPlan {
        mode: TrainingMode::ActiveInternal {
            split: SplitParams {
                method: SplitMethod::Holdout,
                test_size: 0.3,
                random_state: 5,
                ..Default::default()
            },
            al: ActiveLearningParams {
                strategy: QueryStrategy::Ebd,
                init_pct: 20.0,
                batch_size: 10,
                ..Default::default()
            },
        },
        ..Default::default()
    };

    let report = train_and_dump(plan, &lut, dir.path().join("models"), None).unwrap();
    let meta = ModelMeta::read(&report.meta_path).unwrap();
    assert!(meta.active_learning);

    for record in &report.records {
        assert!(!record.trajectory.is_empty());
        let processing = Preprocessing::load(&record.processing_path).unwrap();
        let indices = processing.al_training_indices.unwrap();
        assert!(!indices.is_empty());
        // Provenance refers to original dataset rows
        assert!(indices.iter().all(|&i| i < N_SAMPLES));
    }
}

#[test]
fn test_active_learning_accumulates_indices_across_folds() {
    let dir = tempfile::tempdir().unwrap();
    let lut = synthetic_lut(dir.path());
    let split = SplitParams {
        method: SplitMethod::KFold,
        k_folds: 2,
        random_state: 7,
        ..Default::default()
    };
    let plan = TrainingPlan {
        mode: TrainingMode::ActiveInternal {
            split,
            al: ActiveLearningParams {
                strategy: QueryStrategy::Ebd,
                init_pct: 20.0,
                batch_size: 10,
                ..Default::default()
            },
        },
        ..Default::default()
    };

    let report = train_and_dump(plan, &lut, dir.path().join("models"), None).unwrap();

    // The splitter is deterministic in the sample count and seed, so the
    // fold layout can be reproduced here
    let folds = DatasetSplitter::new(split)
        .split(&Array2::zeros((N_SAMPLES, 1)), &Array1::zeros(N_SAMPLES))
        .unwrap();

    for record in &report.records {
        let processing = Preprocessing::load(&record.processing_path).unwrap();
        let indices = processing.al_training_indices.unwrap();

        let mut sorted = indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), indices.len(), "provenance must be free of duplicates");
        assert!(indices.iter().all(|&i| i < N_SAMPLES));

        // With two folds the pools are disjoint, so every fold contributes
        // at least its seed subset
        for fold in &folds {
            assert!(
                indices.iter().any(|i| fold.train_indices.contains(i)),
                "fold with {} pool rows contributed no indices",
                fold.train_indices.len()
            );
        }
    }
}

#[test]
fn test_retrain_from_saved_indices() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let lut = synthetic_lut(dir.path());

    let first = train_and_dump(
        TrainingPlan {
            mode: TrainingMode::SplitEval {
                split: SplitParams::default(),
            },
            ..Default::default()
        },
        &lut,
        dir.path().join("models"),
        None,
    )?;

    let plan = TrainingPlan {
        mode: TrainingMode::Retrain {
            processing_path: first.records[0].processing_path.clone(),
        },
        ..Default::default()
    };
    let second = train_and_dump(plan, &lut, dir.path().join("retrained"), None)?;
    assert_eq!(second.records.len(), 4);
    for record in &second.records {
        assert!(record.score.unwrap().is_finite());
    }
    Ok(())
}

#[test]
fn test_cancellation_flag_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let lut = synthetic_lut(dir.path());
    let cancel = AtomicBool::new(false);
    cancel.store(true, Ordering::Relaxed);

    let result = train_and_dump(
        TrainingPlan::default(),
        &lut,
        dir.path().join("models"),
        Some(&cancel),
    );
    assert!(matches!(result, Err(SpecError::Cancelled)));
}

#[test]
fn test_end_to_end_inversion_on_imagery() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let lut = synthetic_lut(dir.path());
    let out = dir.path().join("models");
    let report = train_and_dump(TrainingPlan::default(), &lut, &out, None).unwrap();

    // Imagery holding the spectrum of LUT sample 10 in every pixel,
    // band names matching the model features
    let sample = lut.load_samples(0).unwrap();
    let cube = Array3::from_shape_fn((N_BANDS, 5, 5), |(b, _, _)| sample.spectra[(10, b)]);
    let reader =
        MemoryRaster::from_cube(cube).with_band_names(feature_names(&lut.meta, &[]));

    let mut writer = MemoryRaster::zeros(4, 5, 5);
    predict_from_dump(
        &report.meta_path,
        &reader,
        &GeometrySource::Fixed(GeometryEnsemble {
            sun_zenith: 45.0,
            view_zenith: 0.0,
            rel_azimuth: 0.0,
        }),
        None,
        &mut writer,
        None,
        InversionParams::default(),
    )
    .unwrap();

    for band in 0..lut.meta.parameter_names.len() {
        let expected = sample.parameters[(10, band)];
        let predicted = writer.band(band)[(2, 2)];
        assert_abs_diff_eq!(predicted, expected, epsilon = 0.05);
    }
}

#[test]
fn test_inversion_honours_external_mask() {
    let dir = tempfile::tempdir().unwrap();
    let lut = synthetic_lut(dir.path());
    let report = train_and_dump(TrainingPlan::default(), &lut, dir.path().join("m"), None).unwrap();

    let sample = lut.load_samples(0).unwrap();
    let cube = Array3::from_shape_fn((N_BANDS, 2, 2), |(b, _, _)| sample.spectra[(0, b)]);
    let reader =
        MemoryRaster::from_cube(cube).with_band_names(feature_names(&lut.meta, &[]));

    let mut mask_cube = Array3::from_elem((1, 2, 2), 1.0f32);
    mask_cube[(0, 0, 1)] = 0.0;
    let mask = MemoryRaster::from_cube(mask_cube);

    let mut writer = MemoryRaster::zeros(4, 2, 2);
    predict_from_dump(
        &report.meta_path,
        &reader,
        &GeometrySource::Fixed(GeometryEnsemble {
            sun_zenith: 45.0,
            view_zenith: 0.0,
            rel_azimuth: 0.0,
        }),
        Some(&mask),
        &mut writer,
        None,
        InversionParams::default(),
    )
    .unwrap();

    assert_eq!(writer.band(0)[(0, 1)], DEFAULT_NO_DATA);
    assert_ne!(writer.band(0)[(0, 0)], DEFAULT_NO_DATA);
}

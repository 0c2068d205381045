//! specfit: Block-Streaming Raster Model Inversion
//!
//! This library trains regression models on simulated reflectance lookup
//! tables and applies them to imagery in memory-bounded blocks, producing
//! per-pixel estimates of vegetation parameters. Models are selected per
//! pixel by acquisition geometry, training supports synthetic noise
//! injection, cross-validated hyper-parameter search and active learning.

pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    Category, GeometryEnsemble, GeometryGrid, OutputDataType, SpecError, SpecResult,
    DEFAULT_NO_DATA,
};

pub use crate::core::{
    predict_from_dump, train_and_dump, ActiveLearningLoop, ActiveLearningParams, BandMatcher,
    BlockIterParams, BlockRegion, FittedModel, GeometrySource, InversionParams, NoiseInjector,
    NoiseParams, PredictionEngine, PredictionOrchestrator, Preprocessing, RasterBlockIterator,
    RasterModel, Regressor, RegressorConfig, RegressionModel, SplitParams, TrainingMode,
    TrainingOrchestrator, TrainingPlan,
};

pub use io::{LutDataset, LutMeta, MemoryRaster, ModelMeta, RasterReader, RasterWriter};

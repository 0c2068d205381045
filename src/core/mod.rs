//! Core processing modules

pub mod active;
pub mod bands;
pub mod block;
pub mod inversion;
pub mod model;
pub mod noise;
pub mod predict;
pub mod split;
pub mod train;

// Re-export main types
pub use active::{ActiveLearningLoop, ActiveLearningParams, ActiveLearningResult, QueryStrategy};
pub use bands::BandMatcher;
pub use block::{BlockIterParams, BlockRegion, RasterBlockIterator};
pub use inversion::{
    mean_geometry, predict_from_dump, GeometrySource, InversionParams, NdviMask,
    PredictionOrchestrator,
};
pub use model::{
    rmse, FittedModel, KNeighborsRegressor, NearestCentroidClassifier, Pca, Preprocessing,
    Regressor, RegressorConfig, RidgeRegressor, Scaler,
};
pub use noise::{NoiseInjector, NoiseKind, NoiseParams};
pub use predict::{
    ClassificationModel, IdentityModel, PredictionEngine, PredictionParams, RasterModel,
    RegressionModel, TransformDirection, TransformModel,
};
pub use split::{DataSplit, DatasetSplitter, SplitMethod, SplitParams};
pub use train::{
    train_and_dump, TrainedModelRecord, TrainingMode, TrainingOrchestrator, TrainingPlan,
    TrainingReport,
};

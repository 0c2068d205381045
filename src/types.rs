use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Reflectance or feature data, one value per pixel and band
pub type SpecReal = f32;

/// 2D feature table (samples x bands)
pub type FeatureMatrix = Array2<SpecReal>;

/// 1D target vector (one value per sample)
pub type TargetVector = Array1<SpecReal>;

/// Default no-data sentinel written into invalid output pixels
pub const DEFAULT_NO_DATA: f32 = -999.0;

/// A classification category attached to classifier outputs.
///
/// Ids are stable positive integers, unique within a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
    /// Display color as #RRGGBB
    pub color: String,
}

impl Category {
    pub fn new(id: u32, name: &str, color: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            color: color.to_string(),
        }
    }
}

/// One acquisition geometry for which a dedicated LUT and model are trained.
///
/// Angles are given in degrees: sun zenith (tts), view zenith (tto) and
/// relative azimuth (psi).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryEnsemble {
    pub sun_zenith: f32,
    pub view_zenith: f32,
    pub rel_azimuth: f32,
}

impl GeometryEnsemble {
    pub fn new(sun_zenith: f32, view_zenith: f32, rel_azimuth: f32) -> Self {
        Self {
            sun_zenith,
            view_zenith,
            rel_azimuth,
        }
    }
}

/// The grid of geometry angles a set of models was trained on.
///
/// The flattened model index for a (sun, view, azimuth) combination is
/// `azimuth_idx * n_tto * n_tts + view_idx * n_tts + sun_idx`. This
/// row-major convention must match the persisted model files exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryGrid {
    /// Sun zenith angles (tts) in degrees
    pub sun_zeniths: Vec<f32>,
    /// View zenith angles (tto) in degrees
    pub view_zeniths: Vec<f32>,
    /// Relative azimuth angles (psi) in degrees
    pub rel_azimuths: Vec<f32>,
}

impl GeometryGrid {
    pub fn model_count(&self) -> usize {
        self.sun_zeniths.len() * self.view_zeniths.len() * self.rel_azimuths.len()
    }

    /// Flattened model index for a combination of angle indices.
    pub fn model_index(&self, sun_idx: usize, view_idx: usize, azimuth_idx: usize) -> usize {
        let n_tts = self.sun_zeniths.len();
        let n_tto = self.view_zeniths.len();
        azimuth_idx * n_tto * n_tts + view_idx * n_tts + sun_idx
    }

    /// Geometry ensemble for a flattened model index.
    pub fn ensemble(&self, index: usize) -> Option<GeometryEnsemble> {
        let n_tts = self.sun_zeniths.len();
        let n_tto = self.view_zeniths.len();
        if n_tts == 0 || n_tto == 0 || index >= self.model_count() {
            return None;
        }
        let azimuth_idx = index / (n_tto * n_tts);
        let view_idx = (index / n_tts) % n_tto;
        let sun_idx = index % n_tts;
        Some(GeometryEnsemble::new(
            self.sun_zeniths[sun_idx],
            self.view_zeniths[view_idx],
            self.rel_azimuths[azimuth_idx],
        ))
    }

    /// Nearest-value match of a geometry triple against the trained grid.
    pub fn nearest_model_index(&self, geometry: &GeometryEnsemble) -> Option<usize> {
        let sun_idx = nearest_index(&self.sun_zeniths, geometry.sun_zenith)?;
        let view_idx = nearest_index(&self.view_zeniths, geometry.view_zenith)?;
        let azimuth_idx = nearest_index(&self.rel_azimuths, geometry.rel_azimuth)?;
        Some(self.model_index(sun_idx, view_idx, azimuth_idx))
    }

    /// All geometry ensembles in flattened model-index order.
    pub fn ensembles(&self) -> Vec<GeometryEnsemble> {
        (0..self.model_count())
            .filter_map(|i| self.ensemble(i))
            .collect()
    }
}

fn nearest_index(values: &[f32], target: f32) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let da = (*a - target).abs();
            let db = (*b - target).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}

/// Output sample type selected for a prediction raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputDataType {
    Float32,
    UInt8,
    UInt16,
    UInt32,
}

impl OutputDataType {
    /// Smallest unsigned integer type holding `max_id`, for classifier
    /// outputs with bounded category ids.
    pub fn smallest_uint_for(max_id: u32) -> Self {
        if max_id <= u8::MAX as u32 {
            OutputDataType::UInt8
        } else if max_id <= u16::MAX as u32 {
            OutputDataType::UInt16
        } else {
            OutputDataType::UInt32
        }
    }
}

/// Error types for spectral fitting and prediction
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Band mismatch: {0}")]
    BandMismatch(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Training cancelled")]
    Cancelled,
}

/// Result type for spectral fitting operations
pub type SpecResult<T> = Result<T, SpecError>;

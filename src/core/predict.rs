use ndarray::{Array1, Array2};

use crate::core::bands::BandMatcher;
use crate::core::block::{BlockIterParams, RasterBlockIterator};
use crate::core::model::{FittedModel, NearestCentroidClassifier, Pca, Preprocessing, Scaler};
use crate::io::raster::{RasterReader, RasterWriter};
use crate::types::{Category, OutputDataType, SpecError, SpecResult, DEFAULT_NO_DATA};

/// An array-learning backend applied block-wise to raster pixels.
///
/// `apply` receives only the valid pixels of a block as a dense
/// (samples x features) matrix and returns one row per sample with
/// `output_band_count` columns.
pub trait RasterModel {
    /// Input feature names, matched against raster band names
    fn feature_names(&self) -> &[String];

    fn output_band_count(&self) -> usize;

    fn output_band_names(&self) -> Vec<String>;

    fn apply(&self, x: &Array2<f32>) -> SpecResult<Array2<f32>>;

    fn output_data_type(&self) -> OutputDataType {
        OutputDataType::Float32
    }

    /// Categorical legend for classifier outputs
    fn categories(&self) -> Option<&[Category]> {
        None
    }
}

/// Regression model over raster bands, optionally with a std band.
pub struct RegressionModel {
    model: FittedModel,
    preprocessing: Preprocessing,
    with_uncertainty: bool,
}

impl RegressionModel {
    pub fn new(model: FittedModel, preprocessing: Preprocessing) -> Self {
        Self {
            model,
            preprocessing,
            with_uncertainty: false,
        }
    }

    /// Whether the wrapped regressor can report predictive uncertainty
    pub fn supports_std(&self) -> bool {
        self.model.regressor.supports_std()
    }

    /// Also emit a predictive-std band, when the regressor supports one
    pub fn with_uncertainty(mut self) -> SpecResult<Self> {
        if !self.model.regressor.supports_std() {
            return Err(SpecError::Configuration(format!(
                "Regressor '{}' does not provide predictive uncertainty",
                self.model.regressor.config().name()
            )));
        }
        self.with_uncertainty = true;
        Ok(self)
    }
}

impl RasterModel for RegressionModel {
    fn feature_names(&self) -> &[String] {
        &self.model.feature_names
    }

    fn output_band_count(&self) -> usize {
        if self.with_uncertainty {
            2
        } else {
            1
        }
    }

    fn output_band_names(&self) -> Vec<String> {
        if self.with_uncertainty {
            vec![
                self.model.target_name.clone(),
                format!("{} std", self.model.target_name),
            ]
        } else {
            vec![self.model.target_name.clone()]
        }
    }

    fn apply(&self, x: &Array2<f32>) -> SpecResult<Array2<f32>> {
        let transformed = self.preprocessing.transform(x);
        if self.with_uncertainty {
            let (mean, std) = self.model.regressor.predict_with_std(&transformed)?;
            let mut out = Array2::zeros((x.nrows(), 2));
            for i in 0..x.nrows() {
                out[(i, 0)] = mean[i];
                out[(i, 1)] = std[i];
            }
            Ok(out)
        } else {
            let mean = self.model.regressor.predict(&transformed)?;
            Ok(mean.insert_axis(ndarray::Axis(1)))
        }
    }
}

/// Classification model producing category ids.
pub struct ClassificationModel {
    classifier: NearestCentroidClassifier,
    feature_names: Vec<String>,
    output_name: String,
}

impl ClassificationModel {
    pub fn new(
        classifier: NearestCentroidClassifier,
        feature_names: Vec<String>,
        output_name: &str,
    ) -> Self {
        Self {
            classifier,
            feature_names,
            output_name: output_name.to_string(),
        }
    }
}

impl RasterModel for ClassificationModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn output_band_count(&self) -> usize {
        1
    }

    fn output_band_names(&self) -> Vec<String> {
        vec![self.output_name.clone()]
    }

    fn apply(&self, x: &Array2<f32>) -> SpecResult<Array2<f32>> {
        let ids = self.classifier.predict(x)?;
        Ok(ids.insert_axis(ndarray::Axis(1)))
    }

    fn output_data_type(&self) -> OutputDataType {
        OutputDataType::smallest_uint_for(self.classifier.max_category_id())
    }

    fn categories(&self) -> Option<&[Category]> {
        Some(self.classifier.categories())
    }
}

/// Direction of a preprocessing transform over raster bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformDirection {
    Forward,
    Inverse,
}

/// Scaler/PCA transform applied as a raster operation.
pub struct TransformModel {
    scaler: Option<Scaler>,
    pca: Option<Pca>,
    direction: TransformDirection,
    feature_names: Vec<String>,
    output_names: Vec<String>,
}

impl TransformModel {
    pub fn forward(
        scaler: Option<Scaler>,
        pca: Option<Pca>,
        feature_names: Vec<String>,
    ) -> SpecResult<Self> {
        let output_names = match &pca {
            Some(p) => (1..=p.n_components()).map(|i| format!("component {}", i)).collect(),
            None => feature_names.clone(),
        };
        if scaler.is_none() && pca.is_none() {
            return Err(SpecError::Configuration(
                "Transform requires at least a scaler or a PCA".to_string(),
            ));
        }
        Ok(Self {
            scaler,
            pca,
            direction: TransformDirection::Forward,
            feature_names,
            output_names,
        })
    }

    pub fn inverse(
        scaler: Option<Scaler>,
        pca: Option<Pca>,
        output_names: Vec<String>,
    ) -> SpecResult<Self> {
        if scaler.is_none() && pca.is_none() {
            return Err(SpecError::Configuration(
                "Transform requires at least a scaler or a PCA".to_string(),
            ));
        }
        let feature_names = match &pca {
            Some(p) => (1..=p.n_components()).map(|i| format!("component {}", i)).collect(),
            None => output_names.clone(),
        };
        Ok(Self {
            scaler,
            pca,
            direction: TransformDirection::Inverse,
            feature_names,
            output_names,
        })
    }
}

impl RasterModel for TransformModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn output_band_count(&self) -> usize {
        self.output_names.len()
    }

    fn output_band_names(&self) -> Vec<String> {
        self.output_names.clone()
    }

    fn apply(&self, x: &Array2<f32>) -> SpecResult<Array2<f32>> {
        match self.direction {
            TransformDirection::Forward => {
                let scaled = match &self.scaler {
                    Some(s) => s.transform(x),
                    None => x.clone(),
                };
                Ok(match &self.pca {
                    Some(p) => p.transform(&scaled),
                    None => scaled,
                })
            }
            TransformDirection::Inverse => {
                let expanded = match &self.pca {
                    Some(p) => p.inverse_transform(x),
                    None => x.clone(),
                };
                Ok(match &self.scaler {
                    Some(s) => s.inverse_transform(&expanded),
                    None => expanded,
                })
            }
        }
    }
}

/// Identity model, mainly for pipeline round-trip tests.
pub struct IdentityModel {
    feature_names: Vec<String>,
}

impl IdentityModel {
    pub fn new(feature_names: Vec<String>) -> Self {
        Self { feature_names }
    }
}

impl RasterModel for IdentityModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn output_band_count(&self) -> usize {
        self.feature_names.len()
    }

    fn output_band_names(&self) -> Vec<String> {
        self.feature_names.clone()
    }

    fn apply(&self, x: &Array2<f32>) -> SpecResult<Array2<f32>> {
        Ok(x.clone())
    }
}

/// Parameters for block-streaming prediction
#[derive(Debug, Clone)]
pub struct PredictionParams {
    pub block: BlockIterParams,
    /// No-data sentinel written into invalid output pixels
    pub output_no_data: f32,
}

impl Default for PredictionParams {
    fn default() -> Self {
        Self {
            block: BlockIterParams::default(),
            output_no_data: DEFAULT_NO_DATA,
        }
    }
}

/// Streams raster blocks through a model into an output raster.
pub struct PredictionEngine {
    params: PredictionParams,
}

impl PredictionEngine {
    pub fn new() -> Self {
        Self {
            params: PredictionParams::default(),
        }
    }

    pub fn with_params(params: PredictionParams) -> Self {
        Self { params }
    }

    /// Apply `model` over the whole raster, block by block.
    ///
    /// Band matching and shape validation run before the first write, so a
    /// mismatch never leaves a half-written output behind.
    pub fn run(
        &self,
        reader: &dyn RasterReader,
        model: &dyn RasterModel,
        writer: &mut dyn RasterWriter,
    ) -> SpecResult<()> {
        let band_names = reader.band_names();
        let band_list = BandMatcher::match_bands(&band_names, model.feature_names())?;

        if writer.width() != reader.width() || writer.height() != reader.height() {
            return Err(SpecError::Configuration(format!(
                "Output raster extent {}x{} does not match input {}x{}",
                writer.width(),
                writer.height(),
                reader.width(),
                reader.height()
            )));
        }
        if writer.band_count() != model.output_band_count() {
            return Err(SpecError::Configuration(format!(
                "Output raster has {} bands but the model produces {}",
                writer.band_count(),
                model.output_band_count()
            )));
        }

        log::info!(
            "Predicting {}x{} raster with {} input bands into {} output bands",
            reader.width(),
            reader.height(),
            band_list.len(),
            model.output_band_count()
        );

        writer.set_data_type(model.output_data_type())?;
        for (band, name) in model.output_band_names().iter().enumerate() {
            writer.set_band_name(band, name)?;
            writer.set_no_data(band, self.params.output_no_data)?;
            if let Some(categories) = model.categories() {
                writer.set_categories(band, categories)?;
            }
        }

        let iterator = RasterBlockIterator::new(
            reader.width(),
            reader.height(),
            band_list.len() + model.output_band_count(),
            &self.params.block,
        )?;

        let total_lines = reader.height();
        let mut done_lines = 0usize;

        for region in iterator {
            // Valid pixels are finite and not equal to no-data in every used band
            let pixels = region.pixel_count();
            let mut features = Array2::zeros((pixels, band_list.len()));
            let mut valid = vec![true; pixels];
            for (col, &band) in band_list.iter().enumerate() {
                let data = reader.read_block(band, &region)?;
                let no_data = reader.no_data(band);
                for (pixel, &v) in data.iter().enumerate() {
                    features[(pixel, col)] = v;
                    if !v.is_finite() || no_data.map_or(false, |nd| v == nd) {
                        valid[pixel] = false;
                    }
                }
            }
            let valid_indices: Vec<usize> = valid
                .iter()
                .enumerate()
                .filter_map(|(i, &ok)| ok.then_some(i))
                .collect();

            let mut outputs = vec![
                Array1::from_elem(pixels, self.params.output_no_data);
                model.output_band_count()
            ];
            {
                let mut buffers: Vec<&mut Array1<f32>> = outputs.iter_mut().collect();
                apply_over_pixels(model, &features, &valid_indices, &mut buffers)?;
            }

            for (band, values) in outputs.into_iter().enumerate() {
                let data = values
                    .into_shape((region.height, region.width))
                    .map_err(|e| {
                        SpecError::Processing(format!("Output block reshape failed: {}", e))
                    })?;
                writer.write_block(band, &region, &data)?;
            }

            done_lines += region.height;
            log::debug!(
                "Processed lines {}..{} of {} ({} valid pixels)",
                region.y_offset,
                region.y_offset + region.height,
                total_lines,
                valid_indices.len()
            );
        }

        log::info!("Prediction completed ({} lines)", done_lines);
        Ok(())
    }
}

impl Default for PredictionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Compact the selected pixel rows of a block feature matrix, apply the
/// model and scatter its output columns back at those pixels.
///
/// Unselected pixels keep whatever sentinel the buffers were filled with.
pub(crate) fn apply_over_pixels(
    model: &dyn RasterModel,
    features: &Array2<f32>,
    pixels: &[usize],
    outputs: &mut [&mut Array1<f32>],
) -> SpecResult<()> {
    if pixels.is_empty() {
        return Ok(());
    }
    let mut compact = Array2::zeros((pixels.len(), features.ncols()));
    for (row, &pixel) in pixels.iter().enumerate() {
        compact.row_mut(row).assign(&features.row(pixel));
    }
    let result = model.apply(&compact)?;
    if result.dim() != (pixels.len(), outputs.len()) {
        return Err(SpecError::Processing(format!(
            "Model returned shape {:?}, expected ({}, {})",
            result.dim(),
            pixels.len(),
            outputs.len()
        )));
    }
    for (row, &pixel) in pixels.iter().enumerate() {
        for (band, out) in outputs.iter_mut().enumerate() {
            out[pixel] = result[(row, band)];
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::raster::MemoryRaster;
    use ndarray::Array3;

    fn reflectance_raster() -> MemoryRaster {
        let mut cube = Array3::zeros((2, 4, 4));
        for b in 0..2 {
            for y in 0..4 {
                for x in 0..4 {
                    cube[(b, y, x)] = (b * 100 + y * 4 + x) as f32;
                }
            }
        }
        MemoryRaster::from_cube(cube)
            .with_band_names(vec!["red".to_string(), "nir".to_string()])
    }

    #[test]
    fn test_identity_round_trip() {
        let reader = reflectance_raster();
        let model = IdentityModel::new(vec!["red".to_string(), "nir".to_string()]);
        let mut writer = MemoryRaster::zeros(2, 4, 4);

        PredictionEngine::new()
            .run(&reader, &model, &mut writer)
            .unwrap();

        assert_eq!(writer.band(0), reader.band(0));
        assert_eq!(writer.band(1), reader.band(1));
    }

    #[test]
    fn test_no_data_propagates_to_output() {
        let mut cube = Array3::from_elem((1, 2, 2), 1.0f32);
        cube[(0, 0, 0)] = -1.0; // marked no-data below
        cube[(0, 1, 1)] = f32::NAN;
        let reader = MemoryRaster::from_cube(cube)
            .with_band_names(vec!["b".to_string()])
            .with_no_data(-1.0);

        let model = IdentityModel::new(vec!["b".to_string()]);
        let mut writer = MemoryRaster::zeros(1, 2, 2);
        PredictionEngine::new()
            .run(&reader, &model, &mut writer)
            .unwrap();

        let out = writer.band(0);
        assert_eq!(out[(0, 0)], DEFAULT_NO_DATA);
        assert_eq!(out[(1, 1)], DEFAULT_NO_DATA);
        assert_eq!(out[(0, 1)], 1.0);
        assert_eq!(out[(1, 0)], 1.0);
    }

    #[test]
    fn test_band_mismatch_fails_before_write() {
        let reader = reflectance_raster();
        let model = IdentityModel::new(vec![
            "x".to_string(),
            "y".to_string(),
            "z".to_string(),
        ]);
        let mut writer = MemoryRaster::zeros(3, 4, 4);
        let err = PredictionEngine::new().run(&reader, &model, &mut writer);
        assert!(matches!(err, Err(SpecError::BandMismatch(_))));
        // Nothing was written
        assert_eq!(writer.cube().sum(), 0.0);
    }

    #[test]
    fn test_apply_over_pixels_leaves_unselected_pixels() {
        let model = IdentityModel::new(vec!["b".to_string()]);
        let features = Array2::from_shape_vec((4, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut out = Array1::from_elem(4, DEFAULT_NO_DATA);
        {
            let mut buffers = [&mut out];
            apply_over_pixels(&model, &features, &[0, 2], &mut buffers).unwrap();
        }
        assert_eq!(
            out.to_vec(),
            vec![1.0, DEFAULT_NO_DATA, 3.0, DEFAULT_NO_DATA]
        );
    }

    #[test]
    fn test_classifier_output_dtype_and_legend() {
        let names = vec!["b1".to_string(), "b2".to_string()];
        let train =
            Array2::from_shape_vec((2, 2), vec![0.0, 0.0, 10.0, 10.0]).unwrap();
        let categories = vec![
            Category::new(1, "soil", "#aa8855"),
            Category::new(2, "vegetation", "#22aa22"),
        ];
        let classifier =
            NearestCentroidClassifier::fit(&train, &[1, 2], categories).unwrap();
        let model = ClassificationModel::new(classifier, names.clone(), "cover");

        let mut cube = Array3::zeros((2, 2, 2));
        // Pixels (0,0) and (1,0) sit near the first centroid, the rest
        // near the second
        for (y, x, v) in [(0, 0, 1.0), (0, 1, 9.0), (1, 0, 2.0), (1, 1, 8.0)] {
            cube[(0, y, x)] = v;
            cube[(1, y, x)] = v;
        }
        let reader = MemoryRaster::from_cube(cube).with_band_names(names);
        let mut writer = MemoryRaster::zeros(1, 2, 2);

        PredictionEngine::new()
            .run(&reader, &model, &mut writer)
            .unwrap();

        assert_eq!(writer.data_type(), OutputDataType::UInt8);
        let legend = writer.categories(0);
        assert_eq!(legend.len(), 2);
        assert_eq!(legend[0].name, "soil");
        assert_eq!(legend[1].name, "vegetation");

        let ids = writer.band(0);
        assert_eq!(ids[(0, 0)], 1.0);
        assert_eq!(ids[(1, 0)], 1.0);
        assert_eq!(ids[(0, 1)], 2.0);
        assert_eq!(ids[(1, 1)], 2.0);
    }

    #[test]
    fn test_transform_forward_inverse_round_trip() {
        let names: Vec<String> =
            (1..=3).map(|i| format!("b{}", i)).collect();
        // Three bands spanned by two latent factors, so two components
        // reconstruct the data exactly
        let train = Array2::from_shape_fn((16, 3), |(i, c)| {
            let t = 0.1 + 0.05 * (i % 7) as f32;
            let u = 0.2 + 0.03 * (i % 5) as f32;
            match c {
                0 => t,
                1 => 2.0 * t + u,
                _ => t - u,
            }
        });
        let scaler = Scaler::fit(&train).unwrap();
        let pca = Pca::fit(&scaler.transform(&train), 2).unwrap();

        let mut cube = Array3::zeros((3, 4, 4));
        for i in 0..16 {
            for c in 0..3 {
                cube[(c, i / 4, i % 4)] = train[(i, c)];
            }
        }
        let reader = MemoryRaster::from_cube(cube).with_band_names(names.clone());

        let forward =
            TransformModel::forward(Some(scaler.clone()), Some(pca.clone()), names.clone())
                .unwrap();
        let mut components = MemoryRaster::zeros(2, 4, 4);
        PredictionEngine::new()
            .run(&reader, &forward, &mut components)
            .unwrap();

        let inverse =
            TransformModel::inverse(Some(scaler), Some(pca), names).unwrap();
        let mut restored = MemoryRaster::zeros(3, 4, 4);
        PredictionEngine::new()
            .run(&components, &inverse, &mut restored)
            .unwrap();

        for (a, b) in restored.cube().iter().zip(reader.cube().iter()) {
            assert!((a - b).abs() < 1e-3, "restored {} vs {}", a, b);
        }
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};

use crate::core::bands::BandMatcher;
use crate::core::block::{BlockIterParams, RasterBlockIterator};
use crate::core::model::{FittedModel, Preprocessing};
use crate::core::predict::{apply_over_pixels, RasterModel, RegressionModel};
use crate::core::train::{model_path, processing_path};
use crate::io::meta::ModelMeta;
use crate::io::raster::{RasterReader, RasterWriter};
use crate::types::{
    GeometryEnsemble, OutputDataType, SpecError, SpecResult, DEFAULT_NO_DATA,
};

/// Where the per-pixel acquisition geometry comes from.
pub enum GeometrySource<'a> {
    /// One fixed angle triple for the whole image
    Fixed(GeometryEnsemble),
    /// A three-band raster of sun zenith, view zenith and relative azimuth
    /// in degrees, routing every pixel individually
    PerPixel(&'a dyn RasterReader),
}

/// Vegetation mask derived from an NDVI threshold.
#[derive(Debug, Clone, Copy)]
pub struct NdviMask {
    /// Zero-based red band index in the input raster
    pub red_band: usize,
    /// Zero-based near-infrared band index in the input raster
    pub nir_band: usize,
    /// Pixels with NDVI below this value are skipped
    pub threshold: f32,
}

/// Prediction-side options
#[derive(Debug, Clone)]
pub struct InversionParams {
    pub block: BlockIterParams,
    pub output_no_data: f32,
    pub ndvi_mask: Option<NdviMask>,
    /// Emit a companion uncertainty raster when the regressor supports it
    pub write_std: bool,
}

impl Default for InversionParams {
    fn default() -> Self {
        Self {
            block: BlockIterParams::default(),
            output_no_data: DEFAULT_NO_DATA,
            ndvi_mask: None,
            write_std: false,
        }
    }
}

/// Applies a set of trained models to imagery, one output band per target
/// parameter.
///
/// Pixels are routed to the geometry ensemble nearest their acquisition
/// angles, masked pixels and invalid spectra receive the no-data value.
pub struct PredictionOrchestrator {
    meta: ModelMeta,
    name: String,
    directory: PathBuf,
    params: InversionParams,
    /// (model_index, target) -> fitted model, loaded on first use
    models: HashMap<(usize, String), RegressionModel>,
}

impl PredictionOrchestrator {
    /// Open a trained model set by its metafile path.
    pub fn open<P: AsRef<Path>>(meta_path: P, params: InversionParams) -> SpecResult<Self> {
        let meta_path = meta_path.as_ref();
        let meta = ModelMeta::read(meta_path)?;
        let file_stem = meta_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let name = file_stem
            .strip_suffix("_model")
            .unwrap_or(file_stem)
            .to_string();
        let directory = meta_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        log::info!(
            "Opened model set '{}': algorithm {}, {} targets, {} geometry ensembles",
            name,
            meta.algorithm,
            meta.target_names.len(),
            meta.geometry.model_count()
        );
        Ok(Self {
            meta,
            name,
            directory,
            params,
            models: HashMap::new(),
        })
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    fn load_model(&mut self, model_index: usize, target: &str, with_std: bool) -> SpecResult<()> {
        let key = (model_index, target.to_string());
        if self.models.contains_key(&key) {
            return Ok(());
        }
        let m_path = model_path(&self.directory, &self.name, model_index, target);
        let p_path = processing_path(&self.directory, &self.name, model_index, target);
        let model = FittedModel::load(&m_path)?;
        let processing = Preprocessing::load(&p_path)?;
        let mut raster_model = RegressionModel::new(model, processing);
        if with_std {
            raster_model = raster_model.with_uncertainty()?;
        }
        log::debug!(
            "Loaded model for '{}' (ensemble {}) from {}",
            target,
            model_index,
            m_path.display()
        );
        self.models.insert(key, raster_model);
        Ok(())
    }

    /// Run the inversion over a full raster.
    ///
    /// `std_writer` receives per-target prediction uncertainties when
    /// requested and the regressor can provide them. The mask raster's
    /// first band excludes pixels with value zero.
    pub fn run(
        &mut self,
        reader: &dyn RasterReader,
        geometry: &GeometrySource<'_>,
        mask: Option<&dyn RasterReader>,
        writer: &mut dyn RasterWriter,
        mut std_writer: Option<&mut dyn RasterWriter>,
    ) -> SpecResult<()> {
        let n_targets = self.meta.target_names.len();
        if n_targets == 0 {
            return Err(SpecError::Configuration(
                "Model set lists no target parameters".to_string(),
            ));
        }
        if writer.band_count() != n_targets {
            return Err(SpecError::Configuration(format!(
                "Output raster has {} bands but {} target parameters are trained",
                writer.band_count(),
                n_targets
            )));
        }
        if let Some(sw) = &std_writer {
            if sw.band_count() != n_targets {
                return Err(SpecError::Configuration(format!(
                    "Uncertainty raster has {} bands but {} target parameters are trained",
                    sw.band_count(),
                    n_targets
                )));
            }
        }
        check_extent(reader, writer.width(), writer.height(), "output")?;
        if let Some(m) = mask {
            check_extent(reader, m.width(), m.height(), "mask")?;
        }
        if let GeometrySource::PerPixel(angles) = geometry {
            check_extent(reader, angles.width(), angles.height(), "geometry")?;
            if angles.band_count() < 3 {
                return Err(SpecError::Configuration(format!(
                    "Geometry raster needs 3 angle bands, found {}",
                    angles.band_count()
                )));
            }
        }

        // Resolve band order against the first trained model before any
        // output metadata is written
        let targets = self.meta.target_names.clone();
        self.load_model(0, &targets[0], false)?;
        let first = &self.models[&(0, targets[0].clone())];
        let feature_names = first.feature_names().to_vec();
        let supports_std = first.supports_std();
        let band_indices = self.match_input_bands(reader, &feature_names)?;

        let write_std = self.params.write_std && supports_std;
        if self.params.write_std && !write_std {
            log::warn!(
                "Uncertainty output requested but algorithm '{}' provides none",
                self.meta.algorithm
            );
        }
        if write_std {
            // Reload lazily so every cached model carries its std band
            self.models.clear();
        }

        writer.set_data_type(OutputDataType::Float32)?;
        for (band, target) in targets.iter().enumerate() {
            writer.set_band_name(band, target)?;
            writer.set_no_data(band, self.params.output_no_data)?;
            if write_std {
                if let Some(sw) = std_writer.as_deref_mut() {
                    sw.set_data_type(OutputDataType::Float32)?;
                    sw.set_band_name(band, &format!("{} std", target))?;
                    sw.set_no_data(band, self.params.output_no_data)?;
                }
            }
        }

        // Budget covers input bands, outputs and the angle rasters
        let blocks = RasterBlockIterator::new(
            reader.width(),
            reader.height(),
            band_indices.len() + n_targets + 3,
            &self.params.block,
        )?;

        log::info!(
            "Inverting {}x{} pixels, {} input bands, {} targets{}",
            reader.width(),
            reader.height(),
            band_indices.len(),
            n_targets,
            if write_std { " (with uncertainty)" } else { "" }
        );

        let no_data = self.params.output_no_data;
        for region in blocks {
            let n_pixels = region.width * region.height;

            // Gather the block as (pixels x features), row-major
            let mut features = Array2::zeros((n_pixels, band_indices.len()));
            let mut valid = vec![true; n_pixels];
            for (col, &band) in band_indices.iter().enumerate() {
                let data = reader.read_block(band, &region)?;
                let band_no_data = reader.no_data(band);
                for (pixel, &v) in data.iter().enumerate() {
                    features[(pixel, col)] = v;
                    if !v.is_finite() || band_no_data.map_or(false, |nd| v == nd) {
                        valid[pixel] = false;
                    }
                }
            }

            if let Some(ndvi) = &self.params.ndvi_mask {
                let red = reader.read_block(ndvi.red_band, &region)?;
                let nir = reader.read_block(ndvi.nir_band, &region)?;
                for (pixel, (&r, &n)) in red.iter().zip(nir.iter()).enumerate() {
                    let sum = n + r;
                    let value = if sum == 0.0 { 0.0 } else { (n - r) / sum };
                    if !value.is_finite() || value < ndvi.threshold {
                        valid[pixel] = false;
                    }
                }
            }
            if let Some(m) = mask {
                let mask_data = m.read_block(0, &region)?;
                for (pixel, &v) in mask_data.iter().enumerate() {
                    if !v.is_finite() || v == 0.0 {
                        valid[pixel] = false;
                    }
                }
            }

            // Route each valid pixel to its geometry ensemble
            let routing = self.route_pixels(geometry, &region, &valid)?;

            let mut outputs =
                vec![Array1::from_elem(n_pixels, no_data); n_targets];
            let mut std_outputs = if write_std {
                Some(vec![Array1::from_elem(n_pixels, no_data); n_targets])
            } else {
                None
            };

            for (model_index, pixels) in routing {
                for (band, target) in targets.iter().enumerate() {
                    self.load_model(model_index, target, write_std)?;
                    let model = &self.models[&(model_index, target.clone())];
                    if let Some(stds) = std_outputs.as_mut() {
                        let mut buffers = [&mut outputs[band], &mut stds[band]];
                        apply_over_pixels(model, &features, &pixels, &mut buffers)?;
                    } else {
                        let mut buffers = [&mut outputs[band]];
                        apply_over_pixels(model, &features, &pixels, &mut buffers)?;
                    }
                }
            }

            for (band, values) in outputs.into_iter().enumerate() {
                let data = values
                    .into_shape((region.height, region.width))
                    .map_err(|e| {
                        SpecError::Processing(format!("Output block reshape failed: {}", e))
                    })?;
                writer.write_block(band, &region, &data)?;
            }
            if let (Some(stds), Some(sw)) = (std_outputs, std_writer.as_deref_mut()) {
                for (band, values) in stds.into_iter().enumerate() {
                    let data = values
                        .into_shape((region.height, region.width))
                        .map_err(|e| {
                            SpecError::Processing(format!(
                                "Uncertainty block reshape failed: {}",
                                e
                            ))
                        })?;
                    sw.write_block(band, &region, &data)?;
                }
            }

            log::debug!(
                "Inverted block at ({}, {}): {} of {} pixels valid",
                region.x_offset,
                region.y_offset,
                valid.iter().filter(|&&v| v).count(),
                n_pixels
            );
        }

        log::info!("Inversion finished");
        Ok(())
    }

    /// Band order of the input raster matching the model's feature list.
    ///
    /// Falls back to skipping the recorded excluded bands positionally when
    /// the raster carries the full original band set under other names.
    fn match_input_bands(
        &self,
        reader: &dyn RasterReader,
        feature_names: &[String],
    ) -> SpecResult<Vec<usize>> {
        let band_names = reader.band_names();
        match BandMatcher::match_bands(&band_names, feature_names) {
            Ok(indices) => Ok(indices),
            Err(err) => {
                let full = feature_names.len() + self.meta.excluded_bands.len();
                if reader.band_count() == full {
                    log::warn!(
                        "Band names do not match; dropping the {} excluded bands by position",
                        self.meta.excluded_bands.len()
                    );
                    Ok((0..full)
                        .filter(|b| !self.meta.excluded_bands.contains(b))
                        .collect())
                } else {
                    Err(err)
                }
            }
        }
    }

    fn route_pixels(
        &self,
        geometry: &GeometrySource<'_>,
        region: &crate::core::block::BlockRegion,
        valid: &[bool],
    ) -> SpecResult<HashMap<usize, Vec<usize>>> {
        let mut routing: HashMap<usize, Vec<usize>> = HashMap::new();
        match geometry {
            GeometrySource::Fixed(ensemble) => {
                let index = self.meta.geometry.nearest_model_index(ensemble).ok_or_else(
                    || {
                        SpecError::Configuration(
                            "Model set carries an empty geometry grid".to_string(),
                        )
                    },
                )?;
                routing.insert(
                    index,
                    valid
                        .iter()
                        .enumerate()
                        .filter(|(_, &v)| v)
                        .map(|(i, _)| i)
                        .collect(),
                );
            }
            GeometrySource::PerPixel(angles) => {
                let sun = angles.read_block(0, region)?;
                let view = angles.read_block(1, region)?;
                let azimuth = angles.read_block(2, region)?;
                for (pixel, &is_valid) in valid.iter().enumerate() {
                    if !is_valid {
                        continue;
                    }
                    let row = pixel / region.width;
                    let col = pixel % region.width;
                    let ensemble = GeometryEnsemble {
                        sun_zenith: sun[(row, col)],
                        view_zenith: view[(row, col)],
                        rel_azimuth: azimuth[(row, col)],
                    };
                    let index = self
                        .meta
                        .geometry
                        .nearest_model_index(&ensemble)
                        .ok_or_else(|| {
                            SpecError::Configuration(
                                "Model set carries an empty geometry grid".to_string(),
                            )
                        })?;
                    routing.entry(index).or_default().push(pixel);
                }
            }
        }
        Ok(routing)
    }
}

fn check_extent(
    reader: &dyn RasterReader,
    width: usize,
    height: usize,
    role: &str,
) -> SpecResult<()> {
    if width != reader.width() || height != reader.height() {
        return Err(SpecError::Configuration(format!(
            "The {} raster extent {}x{} does not match the input {}x{}",
            role,
            width,
            height,
            reader.width(),
            reader.height()
        )));
    }
    Ok(())
}

/// Average acquisition geometry of a three-band angle raster, for callers
/// that prefer image-mean routing over per-pixel routing.
pub fn mean_geometry(angles: &dyn RasterReader) -> SpecResult<GeometryEnsemble> {
    if angles.band_count() < 3 {
        return Err(SpecError::Configuration(format!(
            "Geometry raster needs 3 angle bands, found {}",
            angles.band_count()
        )));
    }
    let full = crate::core::block::BlockRegion::new(0, 0, angles.width(), angles.height());
    let mut means = [0.0f32; 3];
    for (band, mean) in means.iter_mut().enumerate() {
        let data = angles.read_block(band, &full)?;
        let finite: Vec<f32> = data.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Err(SpecError::Processing(format!(
                "Angle band {} has no finite pixels",
                band
            )));
        }
        *mean = finite.iter().sum::<f32>() / finite.len() as f32;
    }
    Ok(GeometryEnsemble {
        sun_zenith: means[0],
        view_zenith: means[1],
        rel_azimuth: means[2],
    })
}

/// Convenience entry point: open a model set and invert one raster.
pub fn predict_from_dump<P: AsRef<Path>>(
    meta_path: P,
    reader: &dyn RasterReader,
    geometry: &GeometrySource<'_>,
    mask: Option<&dyn RasterReader>,
    writer: &mut dyn RasterWriter,
    std_writer: Option<&mut dyn RasterWriter>,
    params: InversionParams,
) -> SpecResult<()> {
    PredictionOrchestrator::open(meta_path, params)?.run(reader, geometry, mask, writer, std_writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::raster::MemoryRaster;
    use ndarray::Array3;

    #[test]
    fn test_mean_geometry() {
        let mut cube = Array3::zeros((3, 2, 2));
        cube.slice_mut(ndarray::s![0, .., ..]).fill(40.0);
        cube.slice_mut(ndarray::s![1, .., ..]).fill(5.0);
        cube[(2, 0, 0)] = 90.0;
        cube[(2, 0, 1)] = 110.0;
        cube[(2, 1, 0)] = f32::NAN;
        cube[(2, 1, 1)] = 100.0;
        let raster = MemoryRaster::from_cube(cube);
        let mean = mean_geometry(&raster).unwrap();
        assert_eq!(mean.sun_zenith, 40.0);
        assert_eq!(mean.view_zenith, 5.0);
        assert!((mean.rel_azimuth - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_too_few_angle_bands() {
        let raster = MemoryRaster::zeros(2, 2, 2);
        assert!(mean_geometry(&raster).is_err());
    }
}

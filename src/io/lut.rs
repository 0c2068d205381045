use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use ndarray::{s, Array1, Array2};

use crate::io::meta::{join_list, parse_f32_list, parse_string_list, read_meta, write_meta};
use crate::types::{GeometryGrid, SpecError, SpecResult};

const LUT_MAGIC: &[u8; 4] = b"SLUT";

/// Write a 2D array as a little-endian binary LUT file.
///
/// Layout: magic, u32 row count, u32 column count, then row-major f32 data.
pub fn write_lut_array<P: AsRef<Path>>(path: P, data: &Array2<f32>) -> SpecResult<()> {
    let file = std::fs::File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    writer.write_all(LUT_MAGIC)?;
    writer.write_all(&(data.nrows() as u32).to_le_bytes())?;
    writer.write_all(&(data.ncols() as u32).to_le_bytes())?;
    for &v in data.iter() {
        writer.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

/// Read a binary LUT file written by [`write_lut_array`].
pub fn read_lut_array<P: AsRef<Path>>(path: P) -> SpecResult<Array2<f32>> {
    let file = std::fs::File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != LUT_MAGIC {
        return Err(SpecError::InvalidFormat(format!(
            "{} is not a LUT file (bad magic)",
            path.as_ref().display()
        )));
    }
    let mut count = [0u8; 4];
    reader.read_exact(&mut count)?;
    let n_rows = u32::from_le_bytes(count) as usize;
    reader.read_exact(&mut count)?;
    let n_cols = u32::from_le_bytes(count) as usize;

    let mut bytes = vec![0u8; n_rows * n_cols * 4];
    reader.read_exact(&mut bytes)?;
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Array2::from_shape_vec((n_rows, n_cols), values).map_err(|e| {
        SpecError::InvalidFormat(format!(
            "LUT file {} has inconsistent shape: {}",
            path.as_ref().display(),
            e
        ))
    })
}

/// Metadata of a simulated-spectra lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct LutMeta {
    pub name: String,
    /// Physical parameter names stored in the leading columns
    pub parameter_names: Vec<String>,
    /// Band center wavelengths in nanometers
    pub wavelengths: Vec<f32>,
    /// Reflectance scaling factor applied when the LUT was generated
    pub conversion_factor: f32,
    /// Number of data-file splits per geometry ensemble
    pub n_splits: usize,
    pub geometry: GeometryGrid,
}

impl LutMeta {
    pub fn write<P: AsRef<Path>>(&self, path: P) -> SpecResult<()> {
        write_meta(
            path,
            &[
                ("name", self.name.clone()),
                ("parameter_names", join_list(&self.parameter_names)),
                ("wavelengths", join_list(&self.wavelengths)),
                ("conversion_factor", self.conversion_factor.to_string()),
                ("n_splits", self.n_splits.to_string()),
                ("tts", join_list(&self.geometry.sun_zeniths)),
                ("tto", join_list(&self.geometry.view_zeniths)),
                ("psi", join_list(&self.geometry.rel_azimuths)),
            ],
        )
    }

    pub fn read<P: AsRef<Path>>(path: P) -> SpecResult<Self> {
        let path = path.as_ref();
        let entries = read_meta(path)?;
        let get = |key: &str| -> SpecResult<&String> {
            entries.get(key).ok_or_else(|| {
                SpecError::InvalidFormat(format!(
                    "Missing key '{}' in LUT metafile {}",
                    key,
                    path.display()
                ))
            })
        };
        Ok(Self {
            name: get("name")?.clone(),
            parameter_names: parse_string_list(get("parameter_names")?),
            wavelengths: parse_f32_list(get("wavelengths")?)?,
            conversion_factor: get("conversion_factor")?.parse().map_err(|_| {
                SpecError::InvalidFormat(format!(
                    "Invalid conversion_factor in {}",
                    path.display()
                ))
            })?,
            n_splits: get("n_splits")?.parse().map_err(|_| {
                SpecError::InvalidFormat(format!("Invalid n_splits in {}", path.display()))
            })?,
            geometry: GeometryGrid {
                sun_zeniths: parse_f32_list(get("tts")?)?,
                view_zeniths: parse_f32_list(get("tto")?)?,
                rel_azimuths: parse_f32_list(get("psi")?)?,
            },
        })
    }
}

/// Parameter values and reflectance spectra of one geometry ensemble.
#[derive(Debug, Clone)]
pub struct LutSamples {
    /// (samples x parameters)
    pub parameters: Array2<f32>,
    /// (samples x bands)
    pub spectra: Array2<f32>,
}

impl LutSamples {
    /// Target vector for one named parameter
    pub fn target(&self, meta: &LutMeta, name: &str) -> SpecResult<Array1<f32>> {
        let idx = meta
            .parameter_names
            .iter()
            .position(|p| p == name)
            .ok_or_else(|| {
                SpecError::Configuration(format!(
                    "Parameter '{}' not in LUT (available: {:?})",
                    name, meta.parameter_names
                ))
            })?;
        Ok(self.parameters.column(idx).to_owned())
    }
}

/// A lookup table on disk: one metafile plus one binary data file per
/// (geometry ensemble, split) pair, named `<name>_<model>_<split>.lut`.
#[derive(Debug, Clone)]
pub struct LutDataset {
    pub meta: LutMeta,
    directory: PathBuf,
}

impl LutDataset {
    /// Open a LUT by its metafile path.
    pub fn open<P: AsRef<Path>>(meta_path: P) -> SpecResult<Self> {
        let meta_path = meta_path.as_ref();
        let meta = LutMeta::read(meta_path)?;
        let directory = meta_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        log::info!(
            "Opened LUT '{}': {} parameters, {} bands, {} geometry ensembles, {} splits",
            meta.name,
            meta.parameter_names.len(),
            meta.wavelengths.len(),
            meta.geometry.model_count(),
            meta.n_splits
        );
        Ok(Self { meta, directory })
    }

    pub fn data_path(&self, model_index: usize, split: usize) -> PathBuf {
        self.directory
            .join(format!("{}_{}_{}.lut", self.meta.name, model_index, split))
    }

    /// Load all splits of one geometry ensemble and separate parameter
    /// columns from reflectance columns.
    pub fn load_samples(&self, model_index: usize) -> SpecResult<LutSamples> {
        if model_index >= self.meta.geometry.model_count() {
            return Err(SpecError::Configuration(format!(
                "Geometry ensemble index {} out of range ({} trained)",
                model_index,
                self.meta.geometry.model_count()
            )));
        }
        let n_para = self.meta.parameter_names.len();
        let n_bands = self.meta.wavelengths.len();
        let mut rows: Vec<Array2<f32>> = Vec::with_capacity(self.meta.n_splits);
        for split in 0..self.meta.n_splits {
            let path = self.data_path(model_index, split);
            let data = read_lut_array(&path)?;
            if data.ncols() != n_para + n_bands {
                return Err(SpecError::InvalidFormat(format!(
                    "LUT file {} has {} columns, expected {} parameters + {} bands",
                    path.display(),
                    data.ncols(),
                    n_para,
                    n_bands
                )));
            }
            rows.push(data);
        }
        let total_rows: usize = rows.iter().map(|r| r.nrows()).sum();
        let mut combined = Array2::zeros((total_rows, n_para + n_bands));
        let mut offset = 0;
        for chunk in rows {
            combined
                .slice_mut(s![offset..offset + chunk.nrows(), ..])
                .assign(&chunk);
            offset += chunk.nrows();
        }
        log::debug!(
            "Loaded {} samples for geometry ensemble {}",
            total_rows,
            model_index
        );
        Ok(LutSamples {
            parameters: combined.slice(s![.., ..n_para]).to_owned(),
            spectra: combined.slice(s![.., n_para..]).to_owned(),
        })
    }

    /// Create a LUT on disk from in-memory samples (one split), mainly
    /// for tests and synthetic pipelines.
    pub fn create<P: AsRef<Path>>(
        directory: P,
        meta: LutMeta,
        samples: &[(usize, LutSamples)],
    ) -> SpecResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        let meta_path = directory.join(format!("{}.meta", meta.name));
        meta.write(&meta_path)?;
        let dataset = Self { meta, directory };
        for (model_index, sample) in samples {
            let n_rows = sample.parameters.nrows();
            let n_para = sample.parameters.ncols();
            let n_bands = sample.spectra.ncols();
            let mut combined = Array2::zeros((n_rows, n_para + n_bands));
            combined.slice_mut(s![.., ..n_para]).assign(&sample.parameters);
            combined.slice_mut(s![.., n_para..]).assign(&sample.spectra);
            write_lut_array(dataset.data_path(*model_index, 0), &combined)?;
        }
        Ok(dataset)
    }
}

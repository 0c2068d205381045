use std::collections::HashMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::types::{GeometryGrid, SpecError, SpecResult};

/// Read a `key=value` metafile into a map. Lines starting with `#` and
/// blank lines are ignored; list values use `;` separators.
pub fn read_meta<P: AsRef<Path>>(path: P) -> SpecResult<HashMap<String, String>> {
    let file = std::fs::File::open(path.as_ref())?;
    let mut entries = HashMap::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (key, value) = trimmed.split_once('=').ok_or_else(|| {
            SpecError::InvalidFormat(format!(
                "Malformed metafile line in {}: '{}'",
                path.as_ref().display(),
                trimmed
            ))
        })?;
        entries.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(entries)
}

/// Write `key=value` pairs in the given order.
pub fn write_meta<P: AsRef<Path>>(path: P, entries: &[(&str, String)]) -> SpecResult<()> {
    let file = std::fs::File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    for (key, value) in entries {
        writeln!(writer, "{}={}", key, value)?;
    }
    Ok(())
}

pub fn join_list<T: std::fmt::Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

pub fn parse_f32_list(value: &str) -> SpecResult<Vec<f32>> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(';')
        .map(|v| {
            v.trim().parse::<f32>().map_err(|_| {
                SpecError::InvalidFormat(format!("Invalid numeric list entry: '{}'", v))
            })
        })
        .collect()
}

pub fn parse_usize_list(value: &str) -> SpecResult<Vec<usize>> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(';')
        .map(|v| {
            v.trim().parse::<usize>().map_err(|_| {
                SpecError::InvalidFormat(format!("Invalid index list entry: '{}'", v))
            })
        })
        .collect()
}

pub fn parse_string_list(value: &str) -> Vec<String> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    value.split(';').map(|v| v.trim().to_string()).collect()
}

fn require<'a>(
    entries: &'a HashMap<String, String>,
    key: &str,
    path: &Path,
) -> SpecResult<&'a String> {
    entries.get(key).ok_or_else(|| {
        SpecError::InvalidFormat(format!(
            "Missing key '{}' in metafile {}",
            key,
            path.display()
        ))
    })
}

/// Human-readable description of a set of trained models.
///
/// Written next to the serialized model files so a prediction run can
/// recover the training configuration without deserializing every model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMeta {
    /// Regressor name (e.g. "ridge", "knn")
    pub algorithm: String,
    pub noise_kind: String,
    pub noise_level: f32,
    /// 0 means PCA was not used
    pub pca_components: usize,
    /// Scaler description, empty if unscaled
    pub scaler: String,
    pub target_names: Vec<String>,
    pub geometry: GeometryGrid,
    /// Zero-based indices of bands excluded from model features
    pub excluded_bands: Vec<usize>,
    pub active_learning: bool,
    /// Best hyper-parameter description from a search, empty otherwise
    pub best_hyperparameters: String,
}

impl ModelMeta {
    pub fn write<P: AsRef<Path>>(&self, path: P) -> SpecResult<()> {
        log::debug!("Writing model metafile to {}", path.as_ref().display());
        write_meta(
            path,
            &[
                ("algorithm", self.algorithm.clone()),
                ("noise_kind", self.noise_kind.clone()),
                ("noise_level", self.noise_level.to_string()),
                ("pca_components", self.pca_components.to_string()),
                ("scaler", self.scaler.clone()),
                ("target_names", join_list(&self.target_names)),
                ("tts", join_list(&self.geometry.sun_zeniths)),
                ("tto", join_list(&self.geometry.view_zeniths)),
                ("psi", join_list(&self.geometry.rel_azimuths)),
                ("excluded_bands", join_list(&self.excluded_bands)),
                ("active_learning", self.active_learning.to_string()),
                ("best_hyperparameters", self.best_hyperparameters.clone()),
            ],
        )
    }

    pub fn read<P: AsRef<Path>>(path: P) -> SpecResult<Self> {
        let path = path.as_ref();
        let entries = read_meta(path)?;
        Ok(Self {
            algorithm: require(&entries, "algorithm", path)?.clone(),
            noise_kind: require(&entries, "noise_kind", path)?.clone(),
            noise_level: require(&entries, "noise_level", path)?
                .parse()
                .map_err(|_| {
                    SpecError::InvalidFormat(format!("Invalid noise_level in {}", path.display()))
                })?,
            pca_components: require(&entries, "pca_components", path)?
                .parse()
                .map_err(|_| {
                    SpecError::InvalidFormat(format!(
                        "Invalid pca_components in {}",
                        path.display()
                    ))
                })?,
            scaler: entries.get("scaler").cloned().unwrap_or_default(),
            target_names: parse_string_list(require(&entries, "target_names", path)?),
            geometry: GeometryGrid {
                sun_zeniths: parse_f32_list(require(&entries, "tts", path)?)?,
                view_zeniths: parse_f32_list(require(&entries, "tto", path)?)?,
                rel_azimuths: parse_f32_list(require(&entries, "psi", path)?)?,
            },
            excluded_bands: parse_usize_list(
                entries.get("excluded_bands").map(String::as_str).unwrap_or(""),
            )?,
            active_learning: entries
                .get("active_learning")
                .map(|v| v == "true")
                .unwrap_or(false),
            best_hyperparameters: entries
                .get("best_hyperparameters")
                .cloned()
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> ModelMeta {
        ModelMeta {
            algorithm: "ridge".to_string(),
            noise_kind: "gaussian".to_string(),
            noise_level: 4.0,
            pca_components: 5,
            scaler: "standard(mean/std)".to_string(),
            target_names: vec!["LAI".to_string(), "cab".to_string()],
            geometry: GeometryGrid {
                sun_zeniths: vec![30.0, 45.0],
                view_zeniths: vec![0.0],
                rel_azimuths: vec![0.0, 90.0],
            },
            excluded_bands: vec![12, 77],
            active_learning: true,
            best_hyperparameters: "alpha=0.1".to_string(),
        }
    }

    #[test]
    fn test_model_meta_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.meta");
        let meta = sample_meta();
        meta.write(&path).unwrap();
        let read = ModelMeta::read(&path).unwrap();
        assert_eq!(read, meta);
    }

    #[test]
    fn test_missing_key_is_invalid_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.meta");
        write_meta(&path, &[("algorithm", "ridge".to_string())]).unwrap();
        assert!(matches!(
            ModelMeta::read(&path),
            Err(SpecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_list_parsing() {
        assert_eq!(parse_f32_list("1.5; 2.0 ;3").unwrap(), vec![1.5, 2.0, 3.0]);
        assert_eq!(parse_usize_list("").unwrap(), Vec::<usize>::new());
        assert!(parse_f32_list("1.5;abc").is_err());
    }
}

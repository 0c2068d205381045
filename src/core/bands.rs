use crate::types::{SpecError, SpecResult};

/// Resolves which raster bands feed a model's expected features.
///
/// Matching is by exact band name. When any feature name is missing the
/// matcher falls back to positional identity, but only if the raster has
/// exactly as many bands as the model has features.
pub struct BandMatcher;

impl BandMatcher {
    /// Return zero-based band indices such that reading those bands in
    /// order reproduces the model's expected feature order.
    pub fn match_bands(band_names: &[String], feature_names: &[String]) -> SpecResult<Vec<usize>> {
        let exact: Option<Vec<usize>> = feature_names
            .iter()
            .map(|feature| band_names.iter().position(|band| band == feature))
            .collect();

        let band_list = match exact {
            Some(indices) => indices,
            None if band_names.len() == feature_names.len() => {
                log::warn!(
                    "Not all model features found by name; falling back to positional band matching"
                );
                (0..band_names.len()).collect()
            }
            None => {
                return Err(SpecError::BandMismatch(format!(
                    "Raster bands {:?} cannot be matched to model features {:?}: \
                     names disagree and counts differ ({} bands vs {} features)",
                    band_names,
                    feature_names,
                    band_names.len(),
                    feature_names.len()
                )));
            }
        };

        let identity = band_list.len() == band_names.len()
            && band_list.iter().enumerate().all(|(i, &b)| i == b);
        if !identity {
            let used: Vec<&str> = band_list.iter().map(|&i| band_names[i].as_str()).collect();
            log::info!("Using raster bands {:?} for model input", used);
        }

        Ok(band_list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_name_match_reorders() {
        let bands = names(&["A", "B", "C"]);
        let features = names(&["B", "A", "C"]);
        let list = BandMatcher::match_bands(&bands, &features).unwrap();
        assert_eq!(list, vec![1, 0, 2]);
    }

    #[test]
    fn test_positional_fallback_equal_length() {
        let bands = names(&["A", "B"]);
        let features = names(&["X", "Y"]);
        let list = BandMatcher::match_bands(&bands, &features).unwrap();
        assert_eq!(list, vec![0, 1]);
    }

    #[test]
    fn test_mismatched_lengths_error() {
        let bands = names(&["A", "B"]);
        let features = names(&["X", "Y", "Z"]);
        let err = BandMatcher::match_bands(&bands, &features).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("A"), "error should list band names: {}", message);
        assert!(message.contains("X"), "error should list feature names: {}", message);
    }

    #[test]
    fn test_subset_match_by_name() {
        let bands = names(&["red", "nir", "swir"]);
        let features = names(&["nir", "red"]);
        let list = BandMatcher::match_bands(&bands, &features).unwrap();
        assert_eq!(list, vec![1, 0]);
    }
}

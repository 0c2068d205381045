use std::path::Path;
use std::str::FromStr;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::types::{Category, SpecError, SpecResult};

/// Supported regressor kinds and their hyper-parameters.
///
/// Adding a regressor means adding a variant here plus its fit/predict
/// implementation; orchestration code selects models through this record
/// rather than through dedicated wrapper types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegressorConfig {
    /// Linear ridge regression (L2-regularized least squares)
    Ridge { alpha: f64 },
    /// k-nearest-neighbour regression; reports predictive std across
    /// the neighbour targets
    KNeighbors { k: usize },
}

impl Default for RegressorConfig {
    fn default() -> Self {
        RegressorConfig::Ridge { alpha: 1.0 }
    }
}

impl RegressorConfig {
    pub fn name(&self) -> &'static str {
        match self {
            RegressorConfig::Ridge { .. } => "ridge",
            RegressorConfig::KNeighbors { .. } => "knn",
        }
    }
}

impl FromStr for RegressorConfig {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ridge" => Ok(RegressorConfig::Ridge { alpha: 1.0 }),
            "knn" => Ok(RegressorConfig::KNeighbors { k: 5 }),
            _ => Err(SpecError::Configuration(format!(
                "Unknown regressor type: {}. Supported: ridge, knn",
                s
            ))),
        }
    }
}

/// A trainable regressor, serializable once fitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Regressor {
    Ridge(RidgeRegressor),
    KNeighbors(KNeighborsRegressor),
}

impl Regressor {
    pub fn new(config: &RegressorConfig) -> Self {
        match config {
            RegressorConfig::Ridge { alpha } => Regressor::Ridge(RidgeRegressor::new(*alpha)),
            RegressorConfig::KNeighbors { k } => {
                Regressor::KNeighbors(KNeighborsRegressor::new(*k))
            }
        }
    }

    pub fn config(&self) -> RegressorConfig {
        match self {
            Regressor::Ridge(m) => RegressorConfig::Ridge { alpha: m.alpha },
            Regressor::KNeighbors(m) => RegressorConfig::KNeighbors { k: m.k },
        }
    }

    pub fn fit(&mut self, x: &Array2<f32>, y: &Array1<f32>) -> SpecResult<()> {
        match self {
            Regressor::Ridge(m) => m.fit(x, y),
            Regressor::KNeighbors(m) => m.fit(x, y),
        }
    }

    pub fn predict(&self, x: &Array2<f32>) -> SpecResult<Array1<f32>> {
        match self {
            Regressor::Ridge(m) => m.predict(x),
            Regressor::KNeighbors(m) => m.predict(x),
        }
    }

    /// Predictions with a per-sample uncertainty estimate, when the
    /// regressor supports one.
    pub fn predict_with_std(&self, x: &Array2<f32>) -> SpecResult<(Array1<f32>, Array1<f32>)> {
        match self {
            Regressor::KNeighbors(m) => m.predict_with_std(x),
            Regressor::Ridge(_) => Err(SpecError::Configuration(
                "Ridge regression does not provide predictive uncertainty".to_string(),
            )),
        }
    }

    pub fn supports_std(&self) -> bool {
        matches!(self, Regressor::KNeighbors(_))
    }
}

/// Linear ridge regression solved via the normal equations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegressor {
    pub alpha: f64,
    weights: Option<Vec<f64>>,
    intercept: f64,
}

impl RidgeRegressor {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            weights: None,
            intercept: 0.0,
        }
    }

    pub fn fit(&mut self, x: &Array2<f32>, y: &Array1<f32>) -> SpecResult<()> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_samples != y.len() {
            return Err(SpecError::Processing(format!(
                "Cannot fit ridge regression on {} samples with {} targets",
                n_samples,
                y.len()
            )));
        }

        // Center features and target so the intercept stays unpenalized
        let x_mean: Vec<f64> = (0..n_features)
            .map(|c| x.column(c).iter().map(|&v| v as f64).sum::<f64>() / n_samples as f64)
            .collect();
        let y_mean = y.iter().map(|&v| v as f64).sum::<f64>() / n_samples as f64;

        // Normal equations: (Xc^T Xc + alpha I) w = Xc^T yc
        let mut gram = vec![vec![0.0f64; n_features]; n_features];
        let mut rhs = vec![0.0f64; n_features];
        for r in 0..n_samples {
            let yc = y[r] as f64 - y_mean;
            for a in 0..n_features {
                let xa = x[(r, a)] as f64 - x_mean[a];
                rhs[a] += xa * yc;
                for b in a..n_features {
                    gram[a][b] += xa * (x[(r, b)] as f64 - x_mean[b]);
                }
            }
        }
        for a in 0..n_features {
            for b in 0..a {
                gram[a][b] = gram[b][a];
            }
            gram[a][a] += self.alpha;
        }

        let weights = solve_linear_system(gram, rhs).ok_or_else(|| {
            SpecError::Processing("Singular system in ridge regression fit".to_string())
        })?;

        self.intercept = y_mean
            - weights
                .iter()
                .zip(x_mean.iter())
                .map(|(w, m)| w * m)
                .sum::<f64>();
        self.weights = Some(weights);
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f32>) -> SpecResult<Array1<f32>> {
        let weights = self.weights.as_ref().ok_or_else(|| {
            SpecError::Processing("Ridge regressor used before fitting".to_string())
        })?;
        if x.ncols() != weights.len() {
            return Err(SpecError::BandMismatch(format!(
                "Ridge regressor expects {} features, got {}",
                weights.len(),
                x.ncols()
            )));
        }
        let predictions = x
            .axis_iter(Axis(0))
            .map(|row| {
                let dot: f64 = row
                    .iter()
                    .zip(weights.iter())
                    .map(|(&v, w)| v as f64 * w)
                    .sum();
                (dot + self.intercept) as f32
            })
            .collect();
        Ok(predictions)
    }
}

/// k-nearest-neighbour regression over the stored training set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNeighborsRegressor {
    pub k: usize,
    train_x: Option<Vec<Vec<f32>>>,
    train_y: Option<Vec<f32>>,
}

impl KNeighborsRegressor {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            train_x: None,
            train_y: None,
        }
    }

    pub fn fit(&mut self, x: &Array2<f32>, y: &Array1<f32>) -> SpecResult<()> {
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(SpecError::Processing(format!(
                "Cannot fit kNN regression on {} samples with {} targets",
                x.nrows(),
                y.len()
            )));
        }
        self.train_x = Some(x.axis_iter(Axis(0)).map(|row| row.to_vec()).collect());
        self.train_y = Some(y.to_vec());
        Ok(())
    }

    fn neighbour_targets(&self, row: &[f32]) -> SpecResult<Vec<f32>> {
        let train_x = self.train_x.as_ref().ok_or_else(|| {
            SpecError::Processing("kNN regressor used before fitting".to_string())
        })?;
        let train_y = self.train_y.as_ref().unwrap();
        if !train_x.is_empty() && train_x[0].len() != row.len() {
            return Err(SpecError::BandMismatch(format!(
                "kNN regressor expects {} features, got {}",
                train_x[0].len(),
                row.len()
            )));
        }

        let mut distances: Vec<(f32, f32)> = train_x
            .iter()
            .zip(train_y.iter())
            .map(|(t, &target)| {
                let d: f32 = t.iter().zip(row.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
                (d, target)
            })
            .collect();
        distances
            .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        let k = self.k.min(distances.len());
        Ok(distances[..k].iter().map(|&(_, t)| t).collect())
    }

    pub fn predict(&self, x: &Array2<f32>) -> SpecResult<Array1<f32>> {
        let mut out = Vec::with_capacity(x.nrows());
        for row in x.axis_iter(Axis(0)) {
            let targets = self.neighbour_targets(&row.to_vec())?;
            out.push(targets.iter().sum::<f32>() / targets.len() as f32);
        }
        Ok(Array1::from_vec(out))
    }

    pub fn predict_with_std(&self, x: &Array2<f32>) -> SpecResult<(Array1<f32>, Array1<f32>)> {
        let mut means = Vec::with_capacity(x.nrows());
        let mut stds = Vec::with_capacity(x.nrows());
        for row in x.axis_iter(Axis(0)) {
            let targets = self.neighbour_targets(&row.to_vec())?;
            let n = targets.len() as f32;
            let mean = targets.iter().sum::<f32>() / n;
            let var = targets.iter().map(|t| (t - mean) * (t - mean)).sum::<f32>() / n;
            means.push(mean);
            stds.push(var.sqrt());
        }
        Ok((Array1::from_vec(means), Array1::from_vec(stds)))
    }
}

/// Nearest-centroid classifier with a categorical legend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestCentroidClassifier {
    centroids: Vec<Vec<f32>>,
    categories: Vec<Category>,
}

impl NearestCentroidClassifier {
    /// Fit one centroid per category; `labels` holds category ids.
    pub fn fit(x: &Array2<f32>, labels: &[u32], categories: Vec<Category>) -> SpecResult<Self> {
        if x.nrows() != labels.len() {
            return Err(SpecError::Processing(format!(
                "Cannot fit classifier on {} samples with {} labels",
                x.nrows(),
                labels.len()
            )));
        }
        let mut centroids = Vec::with_capacity(categories.len());
        for category in &categories {
            let rows: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter_map(|(i, &l)| (l == category.id).then_some(i))
                .collect();
            if rows.is_empty() {
                return Err(SpecError::Processing(format!(
                    "No training samples for category {} ({})",
                    category.id, category.name
                )));
            }
            let mut centroid = vec![0.0f32; x.ncols()];
            for &r in &rows {
                for c in 0..x.ncols() {
                    centroid[c] += x[(r, c)];
                }
            }
            for v in centroid.iter_mut() {
                *v /= rows.len() as f32;
            }
            centroids.push(centroid);
        }
        Ok(Self {
            centroids,
            categories,
        })
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn max_category_id(&self) -> u32 {
        self.categories.iter().map(|c| c.id).max().unwrap_or(0)
    }

    /// Predict category ids
    pub fn predict(&self, x: &Array2<f32>) -> SpecResult<Array1<f32>> {
        let n_features = self.centroids.first().map(|c| c.len()).unwrap_or(0);
        if x.ncols() != n_features {
            return Err(SpecError::BandMismatch(format!(
                "Classifier expects {} features, got {}",
                n_features,
                x.ncols()
            )));
        }
        let out = x
            .axis_iter(Axis(0))
            .map(|row| {
                let best = self
                    .centroids
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| {
                        let da: f32 =
                            a.iter().zip(row.iter()).map(|(v, w)| (v - w) * (v - w)).sum();
                        let db: f32 =
                            b.iter().zip(row.iter()).map(|(v, w)| (v - w) * (v - w)).sum();
                        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                self.categories[best].id as f32
            })
            .collect();
        Ok(out)
    }
}

/// Per-column standardization (mean/std) with a minimum-std clamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Scaler {
    /// Minimum stddev to avoid division by zero when transforming
    const MIN_STD: f32 = 1e-6;

    pub fn fit(x: &Array2<f32>) -> SpecResult<Self> {
        let (n_rows, n_cols) = x.dim();
        if n_rows == 0 || n_cols == 0 {
            return Err(SpecError::Processing(
                "Cannot fit scaler on an empty matrix".to_string(),
            ));
        }
        let mut mean = vec![0.0f32; n_cols];
        for row in x.axis_iter(Axis(0)) {
            for (c, &v) in row.iter().enumerate() {
                mean[c] += v;
            }
        }
        for v in mean.iter_mut() {
            *v /= n_rows as f32;
        }
        let mut std = vec![0.0f32; n_cols];
        for row in x.axis_iter(Axis(0)) {
            for (c, &v) in row.iter().enumerate() {
                let d = v - mean[c];
                std[c] += d * d;
            }
        }
        for v in std.iter_mut() {
            *v = (*v / n_rows as f32).sqrt().max(Self::MIN_STD);
        }
        Ok(Self { mean, std })
    }

    pub fn transform(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut out = x.clone();
        for mut row in out.axis_iter_mut(Axis(0)) {
            for (c, v) in row.iter_mut().enumerate() {
                *v = (*v - self.mean[c]) / self.std[c];
            }
        }
        out
    }

    pub fn inverse_transform(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut out = x.clone();
        for mut row in out.axis_iter_mut(Axis(0)) {
            for (c, v) in row.iter_mut().enumerate() {
                *v = *v * self.std[c] + self.mean[c];
            }
        }
        out
    }
}

/// Principal component analysis via power iteration with deflation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pca {
    pub mean: Vec<f32>,
    /// Component vectors, one per row (n_components x n_features)
    pub components: Vec<Vec<f32>>,
    pub explained_variance: Vec<f32>,
}

impl Pca {
    const POWER_ITERATIONS: usize = 200;

    pub fn fit(x: &Array2<f32>, n_components: usize) -> SpecResult<Self> {
        let (n_rows, n_cols) = x.dim();
        if n_rows < 2 || n_components == 0 || n_components > n_cols {
            return Err(SpecError::Processing(format!(
                "Cannot fit PCA with {} components on a {}x{} matrix",
                n_components, n_rows, n_cols
            )));
        }

        let mean: Vec<f64> = (0..n_cols)
            .map(|c| x.column(c).iter().map(|&v| v as f64).sum::<f64>() / n_rows as f64)
            .collect();

        // Covariance matrix in f64
        let mut cov = vec![vec![0.0f64; n_cols]; n_cols];
        for row in x.axis_iter(Axis(0)) {
            for a in 0..n_cols {
                let da = row[a] as f64 - mean[a];
                for b in a..n_cols {
                    cov[a][b] += da * (row[b] as f64 - mean[b]);
                }
            }
        }
        for a in 0..n_cols {
            for b in 0..a {
                cov[a][b] = cov[b][a];
            }
        }
        let denom = (n_rows - 1) as f64;
        for row in cov.iter_mut() {
            for v in row.iter_mut() {
                *v /= denom;
            }
        }

        let mut components = Vec::with_capacity(n_components);
        let mut explained = Vec::with_capacity(n_components);
        for comp in 0..n_components {
            // Deterministic start vector; orthogonality comes from deflation
            let mut v: Vec<f64> = (0..n_cols)
                .map(|i| if i == comp % n_cols { 1.0 } else { 1e-3 })
                .collect();
            normalize(&mut v);

            let mut eigenvalue = 0.0f64;
            for _ in 0..Self::POWER_ITERATIONS {
                let mut w = vec![0.0f64; n_cols];
                for a in 0..n_cols {
                    for b in 0..n_cols {
                        w[a] += cov[a][b] * v[b];
                    }
                }
                eigenvalue = norm(&w);
                if eigenvalue <= f64::EPSILON {
                    break;
                }
                for (vi, wi) in v.iter_mut().zip(w.iter()) {
                    *vi = wi / eigenvalue;
                }
            }

            // Deflate: remove the found component from the covariance
            for a in 0..n_cols {
                for b in 0..n_cols {
                    cov[a][b] -= eigenvalue * v[a] * v[b];
                }
            }

            components.push(v.iter().map(|&f| f as f32).collect());
            explained.push(eigenvalue as f32);
        }

        Ok(Self {
            mean: mean.iter().map(|&m| m as f32).collect(),
            components,
            explained_variance: explained,
        })
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    /// Project into component space: (x - mean) @ components^T
    pub fn transform(&self, x: &Array2<f32>) -> Array2<f32> {
        let n_rows = x.nrows();
        let n_comp = self.components.len();
        let mut out = Array2::zeros((n_rows, n_comp));
        for (r, row) in x.axis_iter(Axis(0)).enumerate() {
            for (c, component) in self.components.iter().enumerate() {
                let mut dot = 0.0f32;
                for (i, &v) in row.iter().enumerate() {
                    dot += (v - self.mean[i]) * component[i];
                }
                out[(r, c)] = dot;
            }
        }
        out
    }

    /// Map back from component space: y @ components + mean
    pub fn inverse_transform(&self, y: &Array2<f32>) -> Array2<f32> {
        let n_rows = y.nrows();
        let n_features = self.mean.len();
        let mut out = Array2::zeros((n_rows, n_features));
        for (r, row) in y.axis_iter(Axis(0)).enumerate() {
            for i in 0..n_features {
                let mut v = self.mean[i];
                for (c, component) in self.components.iter().enumerate() {
                    v += row[c] * component[i];
                }
                out[(r, i)] = v;
            }
        }
        out
    }
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn normalize(v: &mut [f64]) {
    let n = norm(v);
    if n > f64::EPSILON {
        for x in v.iter_mut() {
            *x /= n;
        }
    }
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0f64; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in row + 1..n {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}

/// Root-mean-squared error between predictions and reference values.
///
/// Degenerate inputs are not guarded; NaN or infinite values propagate
/// into the result.
pub fn rmse(predictions: &Array1<f32>, reference: &Array1<f32>) -> f32 {
    let n = predictions.len().min(reference.len());
    let sum: f32 = predictions
        .iter()
        .zip(reference.iter())
        .map(|(p, r)| (p - r) * (p - r))
        .sum();
    (sum / n as f32).sqrt()
}

/// A fitted estimator together with its expected input features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    pub regressor: Regressor,
    pub feature_names: Vec<String>,
    pub target_name: String,
}

impl FittedModel {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SpecResult<()> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        log::debug!("Saved model for '{}' to {}", self.target_name, path.as_ref().display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> SpecResult<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let model = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(model)
    }
}

/// Preprocessing state persisted alongside a fitted model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preprocessing {
    pub scaler: Option<Scaler>,
    pub pca: Option<Pca>,
    /// Indices selected by active learning, in acceptance order
    pub al_training_indices: Option<Vec<usize>>,
    /// Training-row provenance of the split used for evaluation
    pub split_training_indices: Option<Vec<usize>>,
    /// Held-out test rows of the original dataset
    pub test_indices: Option<Vec<usize>>,
}

impl Preprocessing {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SpecResult<()> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> SpecResult<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let state = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(state)
    }

    /// Apply scaler then PCA, in training order
    pub fn transform(&self, x: &Array2<f32>) -> Array2<f32> {
        let scaled = match &self.scaler {
            Some(scaler) => scaler.transform(x),
            None => x.clone(),
        };
        match &self.pca {
            Some(pca) => pca.transform(&scaled),
            None => scaled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ridge_recovers_linear_relation() {
        // y = 2*x0 - x1 + 3
        let x = array![
            [0.0, 0.0],
            [1.0, 0.0],
            [0.0, 1.0],
            [1.0, 1.0],
            [2.0, 1.0],
            [3.0, 2.0]
        ];
        let y = x.map_axis(Axis(1), |r| 2.0 * r[0] - r[1] + 3.0);

        let mut model = RidgeRegressor::new(1e-6);
        model.fit(&x, &y).unwrap();
        let pred = model.predict(&x).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-3, "predicted {} expected {}", p, t);
        }
    }

    #[test]
    fn test_knn_predicts_neighbour_mean() {
        let x = array![[0.0], [1.0], [10.0], [11.0]];
        let y = array![0.0, 2.0, 10.0, 12.0];
        let mut model = KNeighborsRegressor::new(2);
        model.fit(&x, &y).unwrap();
        let pred = model.predict(&array![[0.5], [10.5]]).unwrap();
        assert!((pred[0] - 1.0).abs() < 1e-6);
        assert!((pred[1] - 11.0).abs() < 1e-6);

        let (_, std) = model.predict_with_std(&array![[0.5]]).unwrap();
        assert!(std[0] > 0.0);
    }

    #[test]
    fn test_unfitted_regressor_errors() {
        let model = RidgeRegressor::new(1.0);
        assert!(model.predict(&array![[1.0, 2.0]]).is_err());
    }

    #[test]
    fn test_scaler_round_trip() {
        let x = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]];
        let scaler = Scaler::fit(&x).unwrap();
        let t = scaler.transform(&x);
        // Each column centered
        for c in 0..2 {
            let mean: f32 = t.column(c).sum() / 4.0;
            assert!(mean.abs() < 1e-5);
        }
        let back = scaler.inverse_transform(&t);
        for (a, b) in back.iter().zip(x.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_pca_captures_dominant_direction() {
        // Points spread along (1, 1) with tiny orthogonal jitter
        let x = array![
            [0.0, 0.0],
            [1.0, 1.01],
            [2.0, 1.99],
            [3.0, 3.02],
            [4.0, 3.98],
            [5.0, 5.0]
        ];
        let pca = Pca::fit(&x, 1).unwrap();
        let c = &pca.components[0];
        let ratio = (c[0] / c[1]).abs();
        assert!(
            (ratio - 1.0).abs() < 0.1,
            "dominant component should be ~diagonal, got {:?}",
            c
        );

        let projected = pca.transform(&x);
        assert_eq!(projected.dim(), (6, 1));
        let restored = pca.inverse_transform(&projected);
        for (a, b) in restored.iter().zip(x.iter()) {
            assert!((a - b).abs() < 0.1, "restored {} expected {}", a, b);
        }
    }

    #[test]
    fn test_classifier_assigns_nearest_centroid() {
        let x = array![[0.0, 0.0], [0.1, 0.0], [5.0, 5.0], [5.1, 5.0]];
        let labels = vec![1, 1, 2, 2];
        let categories = vec![
            Category::new(1, "soil", "#a0522d"),
            Category::new(2, "vegetation", "#228b22"),
        ];
        let clf = NearestCentroidClassifier::fit(&x, &labels, categories).unwrap();
        let pred = clf.predict(&array![[0.05, 0.0], [4.9, 5.1]]).unwrap();
        assert_eq!(pred[0], 1.0);
        assert_eq!(pred[1], 2.0);
        assert_eq!(clf.max_category_id(), 2);
    }

    #[test]
    fn test_rmse() {
        let a = array![1.0, 2.0, 3.0];
        let b = array![1.0, 2.0, 5.0];
        assert!((rmse(&a, &b) - (4.0f32 / 3.0).sqrt()).abs() < 1e-6);
        assert_eq!(rmse(&a, &a), 0.0);
    }

    #[test]
    fn test_regressor_config_from_str() {
        assert_eq!(
            "ridge".parse::<RegressorConfig>().unwrap(),
            RegressorConfig::Ridge { alpha: 1.0 }
        );
        assert!("random_forest".parse::<RegressorConfig>().is_err());
    }
}

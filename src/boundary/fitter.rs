use std::path::PathBuf;

use log::{info, warn};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::error::{DetectorError, Result};

use super::{
    BoundaryModel,
    kernel::KernelSpec,
    solver::{KernelRows, solve_one_class},
};

pub const DEFAULT_CONTAMINATION: f64 = 0.01;
pub const DEFAULT_TOLERANCE: f64 = 1e-3;

/// Samples required on top of the embedding width unless overridden.
pub const MIN_SAMPLE_MARGIN: usize = 5;
/// Floor for an explicit `min_samples` override.
pub const ABSOLUTE_MIN_SAMPLES: usize = 2;

/// Largest training set whose full kernel matrix is precomputed.
pub const DENSE_KERNEL_LIMIT: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitParams {
    /// Upper bound on the fraction of training embeddings left outside the
    /// boundary (the one-class `nu`).
    pub contamination: f64,
    pub kernel: KernelSpec,
    pub tolerance: f64,
    /// Defaults to `max(10_000_000, 100 * n)`.
    pub max_iterations: Option<usize>,
    /// Defaults to `embedding_dim + MIN_SAMPLE_MARGIN`.
    pub min_samples: Option<usize>,
    /// Row cache budget used above `DENSE_KERNEL_LIMIT` samples.
    pub cache_size_mb: usize,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            contamination: DEFAULT_CONTAMINATION,
            kernel: KernelSpec::default(),
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: None,
            min_samples: None,
            cache_size_mb: 256,
        }
    }
}

impl FitParams {
    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    pub fn with_kernel(mut self, kernel: KernelSpec) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = Some(min_samples);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn required_samples(&self, embedding_dim: usize) -> usize {
        match self.min_samples {
            Some(n) => n.max(ABSOLUTE_MIN_SAMPLES),
            None => embedding_dim + MIN_SAMPLE_MARGIN,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 1.0) {
            return Err(DetectorError::InvalidParameter(format!(
                "contamination must be in (0, 1], got {}",
                self.contamination
            )));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(DetectorError::InvalidParameter(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

pub struct BoundaryFitter {
    params: FitParams,
}

impl BoundaryFitter {
    pub fn new(params: FitParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FitParams {
        &self.params
    }

    /// Fits the one-class boundary over an `(N, D)` embedding matrix in a
    /// single batch.
    pub fn fit(&self, embeddings: ArrayView2<'_, f32>) -> Result<BoundaryModel> {
        self.params.validate()?;

        let (n, d) = embeddings.dim();
        if n == 0 {
            return Err(DetectorError::EmptyDataset(PathBuf::from("<embedding matrix>")));
        }
        if d == 0 {
            return Err(DetectorError::Fit("embeddings have zero width".into()));
        }

        let required = self.params.required_samples(d);
        if n < required {
            return Err(DetectorError::Fit(format!(
                "{} sample(s) is below the minimum of {} for {}-dimensional embeddings",
                n, required, d
            )));
        }

        let data = Array2::from_shape_fn((n, d), |(i, j)| embeddings[[i, j]] as f64);

        if data.iter().any(|v| !v.is_finite()) {
            return Err(DetectorError::Fit("embedding matrix contains non-finite values".into()));
        }

        let first = data.row(0);
        if data.rows().into_iter().all(|row| row == first) {
            return Err(DetectorError::Fit("all embeddings are identical".into()));
        }

        let variance = Statistics::population_variance(data.iter().copied());
        let kernel = self.params.kernel.resolve(d, variance)?;

        let max_iterations = self
            .params
            .max_iterations
            .unwrap_or_else(|| 10_000_000usize.max(100 * n));

        let mut rows = if n <= DENSE_KERNEL_LIMIT {
            KernelRows::dense(&data, kernel)
        } else {
            let row_bytes = n * std::mem::size_of::<f64>();
            let capacity = (self.params.cache_size_mb * 1024 * 1024 / row_bytes).max(2);
            KernelRows::cached(&data, kernel, capacity)
        };

        info!(
            "Fitting one-class boundary on {} x {} embeddings ({} kernel, nu = {})",
            n,
            d,
            kernel.name(),
            self.params.contamination
        );

        let solution = solve_one_class(
            &mut rows,
            self.params.contamination,
            self.params.tolerance,
            max_iterations,
        );

        if !solution.converged {
            warn!(
                "One-class solver reached the iteration cap ({}) before converging",
                max_iterations
            );
        }

        let training_scores = solution
            .gradient
            .iter()
            .map(|g| g - solution.rho)
            .collect::<Vec<_>>();
        let spread = Statistics::std_dev(training_scores.iter());
        let score_scale = if spread.is_finite() && spread > 0.0 { spread } else { 1.0 };

        let mut support_vectors = Vec::new();
        let mut dual_coef = Vec::new();
        for (i, &a) in solution.alpha.iter().enumerate() {
            if a > 0.0 {
                support_vectors.push(data.row(i).to_vec());
                dual_coef.push(a);
            }
        }

        let bounded = dual_coef.iter().filter(|&&a| a >= 1.0).count();
        info!(
            "Fitted boundary with {} support vector(s) ({} at bound), rho = {:.6}",
            support_vectors.len(),
            bounded,
            solution.rho
        );

        BoundaryModel::from_parts(
            d,
            kernel,
            self.params.contamination,
            solution.rho,
            support_vectors,
            dual_coef,
            score_scale,
            n,
        )
    }
}

/// Fits with default solver settings.
pub fn fit(
    embeddings: ArrayView2<'_, f32>,
    contamination: f64,
    kernel: KernelSpec,
) -> Result<BoundaryModel> {
    let params = FitParams::default()
        .with_contamination(contamination)
        .with_kernel(kernel);
    BoundaryFitter::new(params).fit(embeddings)
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;
    use crate::boundary::kernel::Bandwidth;

    fn spread_matrix(n: usize, d: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, d), |(i, j)| ((i * 31 + j * 17) % 23) as f32 / 23.0)
    }

    #[test]
    fn test_empty_matrix_is_empty_dataset() {
        let empty = Array2::<f32>::zeros((0, 8));
        let err = BoundaryFitter::new(FitParams::default()).fit(empty.view()).unwrap_err();
        assert!(matches!(err, DetectorError::EmptyDataset(_)));
    }

    #[test]
    fn test_too_few_samples_is_fit_error() {
        let x = spread_matrix(10, 8);
        let err = BoundaryFitter::new(FitParams::default()).fit(x.view()).unwrap_err();
        assert!(matches!(err, DetectorError::Fit(_)));

        let ok = BoundaryFitter::new(FitParams::default()).fit(spread_matrix(13, 8).view());
        assert!(ok.is_ok());
    }

    #[test]
    fn test_min_samples_override_has_floor() {
        let params = FitParams::default().with_min_samples(0);
        assert_eq!(params.required_samples(768), ABSOLUTE_MIN_SAMPLES);
        assert_eq!(FitParams::default().required_samples(768), 773);
    }

    #[test]
    fn test_identical_rows_are_rejected() {
        let x = Array2::<f32>::from_elem((20, 4), 0.3);
        let err = BoundaryFitter::new(FitParams::default()).fit(x.view()).unwrap_err();
        assert!(matches!(err, DetectorError::Fit(_)));
    }

    #[test]
    fn test_non_finite_values_are_rejected() {
        let mut x = spread_matrix(20, 4);
        x[[3, 2]] = f32::NAN;
        let err = BoundaryFitter::new(FitParams::default()).fit(x.view()).unwrap_err();
        assert!(matches!(err, DetectorError::Fit(_)));
    }

    #[test]
    fn test_invalid_contamination_is_rejected() {
        let x = spread_matrix(20, 4);
        for nu in [0.0, -0.1, 1.5, f64::NAN] {
            let params = FitParams::default().with_contamination(nu);
            assert!(matches!(
                BoundaryFitter::new(params).fit(x.view()).unwrap_err(),
                DetectorError::InvalidParameter(_)
            ));
        }
    }

    #[test]
    fn test_default_kernel_is_rbf_auto() {
        assert_eq!(
            FitParams::default().kernel,
            KernelSpec::Rbf {
                bandwidth: Bandwidth::Auto
            }
        );

        let model = BoundaryFitter::new(FitParams::default())
            .fit(spread_matrix(20, 5).view())
            .unwrap();
        assert_eq!(model.kernel(), crate::boundary::Kernel::Rbf { gamma: 0.2 });
    }

    #[test]
    fn test_model_records_resolved_kernel() {
        let x = spread_matrix(30, 4);
        let model = fit(
            x.view(),
            0.1,
            KernelSpec::Rbf {
                bandwidth: Bandwidth::Auto,
            },
        )
        .unwrap();

        assert_eq!(model.embedding_dim(), 4);
        assert_eq!(model.kernel(), crate::boundary::Kernel::Rbf { gamma: 0.25 });
        assert!(model.support_vector_count() >= 3);
    }
}

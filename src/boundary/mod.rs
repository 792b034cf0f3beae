pub mod fitter;
pub mod kernel;
mod solver;

use std::{fs, path::Path};

use log::info;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::error::{ArtifactKind, DetectorError, Result};

pub use fitter::{BoundaryFitter, FitParams, fit};
pub use kernel::{Bandwidth, Kernel, KernelSpec};

pub const FORMAT_VERSION: u32 = 1;

/// Preprocessing variant the training embeddings went through. Only the
/// canonical transform may produce embeddings for a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocessing {
    Canonical,
}

/// A fitted one-class boundary. Immutable; retraining replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryModel {
    format_version: u32,
    encoder: Option<String>,
    embedding_dim: usize,
    preprocessing: Preprocessing,
    kernel: Kernel,
    nu: f64,
    rho: f64,
    support_vectors: Vec<Vec<f64>>,
    dual_coef: Vec<f64>,
    score_scale: f64,
    training_samples: usize,
}

impl BoundaryModel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        embedding_dim: usize,
        kernel: Kernel,
        nu: f64,
        rho: f64,
        support_vectors: Vec<Vec<f64>>,
        dual_coef: Vec<f64>,
        score_scale: f64,
        training_samples: usize,
    ) -> Result<Self> {
        let model = Self {
            format_version: FORMAT_VERSION,
            encoder: None,
            embedding_dim,
            preprocessing: Preprocessing::Canonical,
            kernel,
            nu,
            rho,
            support_vectors,
            dual_coef,
            score_scale,
            training_samples,
        };
        model.validate()?;
        Ok(model)
    }

    /// Records which encoder produced the training embeddings.
    pub fn with_encoder(mut self, name: impl Into<String>) -> Self {
        self.encoder = Some(name.into());
        self
    }

    pub fn encoder(&self) -> Option<&str> {
        self.encoder.as_deref()
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn preprocessing(&self) -> Preprocessing {
        self.preprocessing
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn nu(&self) -> f64 {
        self.nu
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn support_vector_count(&self) -> usize {
        self.support_vectors.len()
    }

    /// Standard deviation of the decision values over the training set.
    pub fn score_scale(&self) -> f64 {
        self.score_scale
    }

    pub fn training_samples(&self) -> usize {
        self.training_samples
    }

    /// Raw decision value `sum(a_i * K(s_i, x)) - rho`. Positive is inside.
    pub fn decision_function(&self, embedding: ArrayView1<'_, f32>) -> Result<f64> {
        if embedding.len() != self.embedding_dim {
            return Err(DetectorError::ShapeMismatch {
                expected: format!("embedding of width {}", self.embedding_dim),
                actual: format!("width {}", embedding.len()),
            });
        }

        let x = embedding.iter().map(|&v| v as f64).collect::<Vec<_>>();
        Ok(self.decision_value(&x))
    }

    pub(crate) fn decision_value(&self, x: &[f64]) -> f64 {
        let sum = self
            .support_vectors
            .iter()
            .zip(&self.dual_coef)
            .map(|(sv, &coef)| coef * self.kernel.eval(sv, x))
            .sum::<f64>();
        sum - self.rho
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(path, serde_json::to_string(self)?)?;
        info!("Saved boundary model to '{}'", path.display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DetectorError::ArtifactNotFound {
                kind: ArtifactKind::BoundaryModel,
                path: path.to_path_buf(),
            });
        }

        let model: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(DetectorError::InvalidParameter(format!(
                "unsupported boundary format version {}",
                self.format_version
            )));
        }
        if self.support_vectors.is_empty() || self.support_vectors.len() != self.dual_coef.len() {
            return Err(DetectorError::InvalidParameter(format!(
                "{} support vector(s) with {} coefficient(s)",
                self.support_vectors.len(),
                self.dual_coef.len()
            )));
        }
        if self
            .support_vectors
            .iter()
            .any(|sv| sv.len() != self.embedding_dim)
        {
            return Err(DetectorError::InvalidParameter(format!(
                "support vectors do not match embedding width {}",
                self.embedding_dim
            )));
        }
        if !self.rho.is_finite() {
            return Err(DetectorError::InvalidParameter("non-finite offset".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, Array2};

    use super::*;

    fn model() -> BoundaryModel {
        let x = Array2::from_shape_fn((40, 3), |(i, j)| {
            (((i * 13 + j * 7) % 19) as f32 / 19.0) + 0.1 * j as f32
        });
        fit(x.view(), 0.1, KernelSpec::default()).unwrap().with_encoder("test")
    }

    #[test]
    fn test_save_load_scores_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boundary.json");
        let original = model();
        original.save(&path).unwrap();

        let loaded = BoundaryModel::load(&path).unwrap();
        assert_eq!(loaded, original);

        for i in 0..25 {
            let query = Array1::from_shape_fn(3, |j| (i as f32 * 0.137 + j as f32 * 0.71).sin());
            assert_eq!(
                original.decision_function(query.view()).unwrap(),
                loaded.decision_function(query.view()).unwrap()
            );
        }
    }

    #[test]
    fn test_missing_artifact() {
        let err = BoundaryModel::load("nowhere/boundary.json").unwrap_err();
        assert!(matches!(
            err,
            DetectorError::ArtifactNotFound { kind: ArtifactKind::BoundaryModel, .. }
        ));
    }

    #[test]
    fn test_wrong_width_is_rejected() {
        let query = Array1::<f32>::zeros(5);
        assert!(matches!(
            model().decision_function(query.view()).unwrap_err(),
            DetectorError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_unknown_preprocessing_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boundary.json");
        let json = serde_json::to_string(&model())
            .unwrap()
            .replace("\"canonical\"", "\"augmented\"");
        fs::write(&path, json).unwrap();

        assert!(matches!(
            BoundaryModel::load(&path).unwrap_err(),
            DetectorError::Serialization(_)
        ));
    }
}

use std::{fs, path::Path};

use ndarray::{Array1, Array2, ArrayView4, s};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ArtifactKind, DetectorError, Result},
    preprocess::{CHANNELS, INPUT_SIZE},
};

use super::Encoder;

pub const DEFAULT_PATCH_SIZE: usize = 16;

#[derive(Debug, Serialize, Deserialize)]
struct ProjectionWeights {
    model_name: String,
    patch_size: usize,
    embedding_dim: usize,
    /// Row-major `(embedding_dim, pooled_features)`.
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

/// Frozen linear encoder over per-channel patch means.
///
/// The 224×224 input is cut into a grid of square patches (14×14 for the
/// default 16-pixel patch), each patch is averaged per channel, and a fixed
/// projection maps the pooled vector to the embedding.
#[derive(Debug, Clone)]
pub struct PatchProjectionEncoder {
    name: String,
    patch_size: usize,
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl PatchProjectionEncoder {
    pub fn new(
        name: impl Into<String>,
        patch_size: usize,
        weights: Array2<f32>,
        bias: Array1<f32>,
    ) -> Result<Self> {
        if patch_size == 0 || INPUT_SIZE as usize % patch_size != 0 {
            return Err(DetectorError::InvalidParameter(format!(
                "patch size {} does not tile a {}px input",
                patch_size, INPUT_SIZE
            )));
        }

        let features = pooled_len(patch_size);
        if weights.ncols() != features {
            return Err(DetectorError::ShapeMismatch {
                expected: format!("{} projection columns", features),
                actual: format!("{}", weights.ncols()),
            });
        }
        if bias.len() != weights.nrows() {
            return Err(DetectorError::ShapeMismatch {
                expected: format!("{} bias entries", weights.nrows()),
                actual: format!("{}", bias.len()),
            });
        }
        if weights.nrows() == 0 {
            return Err(DetectorError::InvalidParameter(
                "embedding dimension must be positive".into(),
            ));
        }

        Ok(Self {
            name: name.into(),
            patch_size,
            weights,
            bias,
        })
    }

    /// Random Gaussian projection scaled by `1/sqrt(pooled_features)`.
    pub fn seeded(name: impl Into<String>, embedding_dim: usize, seed: u64) -> Self {
        let features = pooled_len(DEFAULT_PATCH_SIZE);
        let scale = 1.0 / (features as f64).sqrt();
        let mut rng = StdRng::seed_from_u64(seed);

        let weights = Array2::from_shape_simple_fn((embedding_dim.max(1), features), || {
            (rng.sample::<f64, _>(StandardNormal) * scale) as f32
        });
        let bias = Array1::zeros(embedding_dim.max(1));

        Self {
            name: name.into(),
            patch_size: DEFAULT_PATCH_SIZE,
            weights,
            bias,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DetectorError::ArtifactNotFound {
                kind: ArtifactKind::EncoderWeights,
                path: path.to_path_buf(),
            });
        }

        let stored: ProjectionWeights = serde_json::from_str(&fs::read_to_string(path)?)?;

        let cols = stored.weights.first().map(Vec::len).unwrap_or(0);
        if stored.weights.len() != stored.embedding_dim
            || stored.weights.iter().any(|row| row.len() != cols)
        {
            return Err(DetectorError::InvalidParameter(format!(
                "malformed projection matrix in '{}'",
                path.display()
            )));
        }

        let flat = stored.weights.into_iter().flatten().collect::<Vec<_>>();
        let weights = Array2::from_shape_vec((stored.embedding_dim, cols), flat)
            .map_err(|e| DetectorError::InvalidParameter(e.to_string()))?;

        Self::new(
            stored.model_name,
            stored.patch_size,
            weights,
            Array1::from_vec(stored.bias),
        )
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let stored = ProjectionWeights {
            model_name: self.name.clone(),
            patch_size: self.patch_size,
            embedding_dim: self.weights.nrows(),
            weights: self.weights.rows().into_iter().map(|r| r.to_vec()).collect(),
            bias: self.bias.to_vec(),
        };

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string(&stored)?)?;
        Ok(())
    }

    fn pool(&self, batch: &ArrayView4<'_, f32>) -> Array2<f32> {
        let n = batch.dim().0;
        let grid = INPUT_SIZE as usize / self.patch_size;
        let ps = self.patch_size;
        let mut pooled = Array2::zeros((n, pooled_len(ps)));

        for i in 0..n {
            for c in 0..CHANNELS {
                for gy in 0..grid {
                    for gx in 0..grid {
                        let patch = batch.slice(s![i, c, gy * ps..(gy + 1) * ps, gx * ps..(gx + 1) * ps]);
                        pooled[[i, c * grid * grid + gy * grid + gx]] = patch.mean().unwrap_or(0.0);
                    }
                }
            }
        }

        pooled
    }
}

impl Encoder for PatchProjectionEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn embedding_dim(&self) -> usize {
        self.weights.nrows()
    }

    fn forward(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let pooled = self.pool(&batch);
        Ok(pooled.dot(&self.weights.t()) + &self.bias)
    }
}

fn pooled_len(patch_size: usize) -> usize {
    let grid = INPUT_SIZE as usize / patch_size.max(1);
    CHANNELS * grid * grid
}

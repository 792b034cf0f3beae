//! Frozen feature extraction.
//!
//! The pretrained encoder is treated as a pure vector function behind the
//! [`Encoder`] trait. [`FeatureExtractor`] is the immutable handle the rest of
//! the pipeline talks to and checks shapes on the way in and out.

#[cfg(feature = "onnx")]
pub mod onnx;
pub mod patch_projection;

use std::path::Path;

use log::info;
use ndarray::{Array1, Array2, ArrayView4, Axis};

use crate::{
    error::{ArtifactKind, DetectorError, Result},
    preprocess::{CHANNELS, INPUT_SIZE, Tensor},
};

pub use patch_projection::PatchProjectionEncoder;

/// A pretrained image encoder with its classification head removed.
///
/// Implementations run in inference mode only: `forward` must not update any
/// parameter or buffer, so concurrent calls are safe to interleave.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;

    /// Width of the vectors produced by `forward`.
    fn embedding_dim(&self) -> usize;

    /// Maps an `(N, 3, 224, 224)` batch to an `(N, embedding_dim)` matrix.
    fn forward(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>>;
}

pub struct FeatureExtractor {
    encoder: Box<dyn Encoder>,
}

impl FeatureExtractor {
    pub fn new<E: Encoder + 'static>(encoder: E) -> Self {
        Self::from_boxed(Box::new(encoder))
    }

    pub fn from_boxed(encoder: Box<dyn Encoder>) -> Self {
        Self { encoder }
    }

    /// Resolves `model_name` inside `weights_dir` and wraps the result.
    pub fn load<P: AsRef<Path>>(model_name: &str, weights_dir: P) -> Result<Self> {
        let encoder = load_encoder(model_name, weights_dir.as_ref())?;
        info!(
            "Loaded encoder '{}' ({}-dimensional embeddings)",
            encoder.name(),
            encoder.embedding_dim()
        );
        Ok(Self::from_boxed(encoder))
    }

    pub fn model_name(&self) -> &str {
        self.encoder.name()
    }

    pub fn embedding_dim(&self) -> usize {
        self.encoder.embedding_dim()
    }

    pub fn embed(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let (n, c, h, w) = batch.dim();
        let size = INPUT_SIZE as usize;
        if c != CHANNELS || h != size || w != size {
            return Err(DetectorError::ShapeMismatch {
                expected: format!("(N, {}, {}, {})", CHANNELS, size, size),
                actual: format!("({}, {}, {}, {})", n, c, h, w),
            });
        }

        let embeddings = self.encoder.forward(batch)?;

        let expected = (n, self.embedding_dim());
        if embeddings.dim() != expected {
            return Err(DetectorError::ShapeMismatch {
                expected: format!("{:?}", expected),
                actual: format!("{:?}", embeddings.dim()),
            });
        }

        if embeddings.iter().any(|v| !v.is_finite()) {
            return Err(DetectorError::Encoder(format!(
                "encoder '{}' produced non-finite values",
                self.model_name()
            )));
        }

        Ok(embeddings)
    }

    pub fn embed_one(&self, tensor: &Tensor) -> Result<Array1<f32>> {
        let batch = tensor.view().insert_axis(Axis(0));
        let embeddings = self.embed(batch)?;
        Ok(embeddings.row(0).to_owned())
    }
}

/// Finds the weights artifact for `model_name`. An ONNX export takes
/// precedence when the `onnx` feature is enabled; otherwise a JSON
/// patch-projection encoder is expected.
pub fn load_encoder(model_name: &str, weights_dir: &Path) -> Result<Box<dyn Encoder>> {
    #[cfg(feature = "onnx")]
    {
        let onnx_path = weights_dir.join(format!("{}.onnx", model_name));
        if onnx_path.is_file() {
            return Ok(Box::new(onnx::OnnxEncoder::load(model_name, &onnx_path)?));
        }
    }

    let json_path = weights_dir.join(format!("{}.json", model_name));
    if json_path.is_file() {
        return Ok(Box::new(PatchProjectionEncoder::load(&json_path)?));
    }

    Err(DetectorError::ArtifactNotFound {
        kind: ArtifactKind::EncoderWeights,
        path: json_path,
    })
}

use std::path::Path;

use log::debug;
use ndarray::{Array2, Array4, ArrayView4};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use parking_lot::Mutex;

use crate::{
    error::{DetectorError, Result},
    preprocess::{CHANNELS, INPUT_SIZE},
};

use super::Encoder;

fn encoder_error<E: std::fmt::Display>(err: E) -> DetectorError {
    DetectorError::Encoder(err.to_string())
}

/// Headless encoder exported to ONNX (e.g. a ViT with its head replaced by
/// identity). The runtime session needs exclusive access per run, so it sits
/// behind a mutex; the graph itself is inference-only.
pub struct OnnxEncoder {
    name: String,
    session: Mutex<Session>,
    embedding_dim: usize,
}

impl OnnxEncoder {
    pub fn load(name: &str, path: &Path) -> Result<Self> {
        let session = Session::builder()
            .map_err(encoder_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(encoder_error)?
            .commit_from_file(path)
            .map_err(encoder_error)?;

        let mut encoder = Self {
            name: name.to_string(),
            session: Mutex::new(session),
            embedding_dim: 0,
        };

        // Output width is discovered once with a blank input image.
        let size = INPUT_SIZE as usize;
        let query = Array4::<f32>::zeros((1, CHANNELS, size, size));
        encoder.embedding_dim = encoder.run(query.view())?.ncols();
        debug!(
            "ONNX encoder '{}' reports {} output features",
            name, encoder.embedding_dim
        );

        Ok(encoder)
    }

    fn run(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let (n, c, h, w) = batch.dim();
        let data = batch.iter().copied().collect::<Vec<f32>>();
        let input = TensorRef::from_array_view(([n, c, h, w], data.as_slice()))
            .map_err(encoder_error)?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input])
            .map_err(encoder_error)?;
        let (shape, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(encoder_error)?;

        let dims = shape.iter().map(|&d| d.max(0) as usize).collect::<Vec<_>>();
        match dims.as_slice() {
            [rows, width] if *rows == n => {
                Array2::from_shape_vec((n, *width), values.to_vec())
                    .map_err(|e| DetectorError::Encoder(e.to_string()))
            }
            // Token sequence output: keep the class token of each image.
            [rows, tokens, width] if *rows == n && *tokens > 0 => {
                let stride = tokens * width;
                let mut out = Array2::zeros((n, *width));
                for i in 0..n {
                    for j in 0..*width {
                        out[[i, j]] = values[i * stride + j];
                    }
                }
                Ok(out)
            }
            other => Err(DetectorError::ShapeMismatch {
                expected: format!("({}, D) or ({}, T, D)", n, n),
                actual: format!("{:?}", other),
            }),
        }
    }
}

impl Encoder for OnnxEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn forward(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        self.run(batch)
    }
}

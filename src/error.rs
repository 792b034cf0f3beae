use std::{fmt, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    EncoderWeights,
    BoundaryModel,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::EncoderWeights => write!(f, "Encoder weights"),
            ArtifactKind::BoundaryModel => write!(f, "Boundary model"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Could not decode image '{origin}': {source}")]
    Decode {
        origin: String,
        source: image::ImageError,
    },

    #[error("No embeddable images found in '{}'", .0.display())]
    EmptyDataset(PathBuf),

    #[error("Boundary fitting failed: {0}")]
    Fit(String),

    #[error("{kind} not found at '{}'", .path.display())]
    ArtifactNotFound { kind: ArtifactKind, path: PathBuf },

    #[error("Input image not found: '{}'", .0.display())]
    InputNotFound(PathBuf),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DetectorError {
    /// Per-item decode failures are absorbed by the collector; everything
    /// else aborts the current stage.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DetectorError::Decode { .. })
    }
}

pub type Result<T> = std::result::Result<T, DetectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_decode_is_recoverable() {
        let decode = DetectorError::Decode {
            origin: "broken.jpg".into(),
            source: image::ImageError::IoError(std::io::Error::other("truncated")),
        };
        assert!(decode.is_recoverable());
        assert!(!DetectorError::EmptyDataset(PathBuf::from("data")).is_recoverable());
        assert!(!DetectorError::Fit("too few samples".into()).is_recoverable());
    }

    #[test]
    fn test_artifact_message_names_kind_and_path() {
        let err = DetectorError::ArtifactNotFound {
            kind: ArtifactKind::BoundaryModel,
            path: PathBuf::from("one_class_svm.json"),
        };
        assert_eq!(
            err.to_string(),
            "Boundary model not found at 'one_class_svm.json'"
        );
    }
}

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::Serialize;
use statrs::statistics::Statistics;

use crate::{
    boundary::{BoundaryModel, Kernel},
    collector::Collection,
    scoring::{Authenticity, ConfidenceLevel, Decision, Label, Verdict, authenticity_probability},
};

#[derive(Debug, Clone, Serialize)]
pub struct ScoreSummary {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    /// Fraction of training embeddings that land outside their own boundary.
    pub rejected_fraction: f64,
}

impl ScoreSummary {
    pub fn from_decisions(decisions: &[Decision]) -> Self {
        let scores = decisions.iter().map(|d| d.signed_distance).collect::<Vec<_>>();
        let rejected = decisions.iter().filter(|d| !d.is_inlier()).count();

        Self {
            min: Statistics::min(scores.iter()),
            mean: Statistics::mean(scores.iter()),
            max: Statistics::max(scores.iter()),
            rejected_fraction: if decisions.is_empty() {
                0.0
            } else {
                rejected as f64 / decisions.len() as f64
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedSection {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub data_dir: PathBuf,
    pub boundary_path: PathBuf,
    pub encoder: String,
    pub embedding_dim: usize,
    pub samples: usize,
    pub skipped: Vec<SkippedSection>,
    pub support_vectors: usize,
    pub contamination: f64,
    pub kernel: Kernel,
    pub training_scores: ScoreSummary,
}

impl TrainingReport {
    pub fn new(
        data_dir: &Path,
        boundary_path: &Path,
        collection: &Collection,
        model: &BoundaryModel,
        training_decisions: &[Decision],
    ) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            boundary_path: boundary_path.to_path_buf(),
            encoder: model.encoder().unwrap_or_default().to_string(),
            embedding_dim: model.embedding_dim(),
            samples: collection.len(),
            skipped: collection
                .skipped
                .iter()
                .map(|s| SkippedSection {
                    path: s.path.clone(),
                    reason: s.reason.clone(),
                })
                .collect(),
            support_vectors: model.support_vector_count(),
            contamination: model.nu(),
            kernel: model.kernel(),
            training_scores: ScoreSummary::from_decisions(training_decisions),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Extracted {} feature vectors of dimension {} with '{}'",
            self.samples, self.embedding_dim, self.encoder
        )?;
        if !self.skipped.is_empty() {
            writeln!(f, "Skipped {} unreadable file(s):", self.skipped.len())?;
            for s in &self.skipped {
                writeln!(f, "  {}: {}", s.path.display(), s.reason)?;
            }
        }
        writeln!(
            f,
            "One-class boundary: {} kernel, nu = {}, {} support vector(s)",
            self.kernel.name(),
            self.contamination,
            self.support_vectors
        )?;
        writeln!(
            f,
            "Training scores: min {:.4}, mean {:.4}, max {:.4}, {:.2}% outside",
            self.training_scores.min,
            self.training_scores.mean,
            self.training_scores.max,
            self.training_scores.rejected_fraction * 100.0
        )?;
        write!(f, "Boundary model saved to '{}'", self.boundary_path.display())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectionReport {
    pub image: PathBuf,
    pub verdict: Verdict,
    pub label: Label,
    pub signed_distance: f64,
    pub confidence: ConfidenceLevel,
}

impl InspectionReport {
    pub fn new(image: &Path, decision: &Decision, confidence: ConfidenceLevel) -> Self {
        Self {
            image: image.to_path_buf(),
            verdict: decision.verdict(),
            label: decision.label,
            signed_distance: decision.signed_distance,
            confidence,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for InspectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Inference Result ---")?;
        writeln!(f, "Prediction: {}", self.verdict)?;
        writeln!(f, "Confidence Score: {:.4}", self.signed_distance)?;
        writeln!(f, "------------------------")?;
        match self.verdict {
            Verdict::Real => write!(f, "This package appears to be authentic."),
            Verdict::Fake => write!(
                f,
                "This package is flagged as a potential FAKE (anomaly detected)."
            ),
        }
    }
}

/// Distance assigned to a package with no scored photos.
pub const EMPTY_PACKAGE_DISTANCE: f64 = -1.0;

/// Several photos of one package folded into a single authenticity call.
#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub photos: Vec<InspectionReport>,
    pub average_distance: f64,
    pub probability: u8,
    pub authenticity: Authenticity,
    pub warning: bool,
}

impl PackageReport {
    pub fn new(photos: Vec<InspectionReport>) -> Self {
        let average_distance = if photos.is_empty() {
            EMPTY_PACKAGE_DISTANCE
        } else {
            Statistics::mean(photos.iter().map(|p| p.signed_distance))
        };
        let probability = authenticity_probability(average_distance);
        let authenticity = Authenticity::from_probability(probability);

        Self {
            photos,
            average_distance,
            probability,
            authenticity,
            warning: authenticity.is_warning(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for PackageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Package Result ---")?;
        for photo in &self.photos {
            writeln!(
                f,
                "{}: {} ({:.4})",
                photo.image.display(),
                photo.verdict,
                photo.signed_distance
            )?;
        }
        writeln!(f, "Average Score: {:.4}", self.average_distance)?;
        writeln!(f, "Authenticity: {}% ({})", self.probability, self.authenticity)?;
        write!(f, "----------------------")?;
        if self.warning {
            write!(
                f,
                "\nWarning: this package shows strong signs of being counterfeit."
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_of_decisions() {
        let decisions = [0.5, -0.25, 0.25, 1.0]
            .into_iter()
            .map(Decision::from_distance)
            .collect::<Vec<_>>();
        let summary = ScoreSummary::from_decisions(&decisions);

        assert_eq!(summary.min, -0.25);
        assert_eq!(summary.max, 1.0);
        assert!((summary.mean - 0.375).abs() < 1e-12);
        assert_eq!(summary.rejected_fraction, 0.25);
    }

    #[test]
    fn test_inspection_report_text_and_json() {
        let decision = Decision::from_distance(-0.12346);
        let report = InspectionReport::new(Path::new("box.jpg"), &decision, ConfidenceLevel::Low);

        let text = report.to_string();
        assert!(text.contains("Prediction: FAKE"));
        assert!(text.contains("Confidence Score: -0.1235"));

        let json = report.to_json().unwrap();
        assert!(json.contains("\"verdict\": \"FAKE\""));
    }

    fn photo(name: &str, distance: f64) -> InspectionReport {
        let decision = Decision::from_distance(distance);
        InspectionReport::new(Path::new(name), &decision, ConfidenceLevel::Medium)
    }

    #[test]
    fn test_package_report_averages_photos() {
        let report = PackageReport::new(vec![
            photo("front.jpg", 0.004),
            photo("back.jpg", -0.002),
            photo("barcode.jpg", 0.001),
        ]);

        assert!((report.average_distance - 0.001).abs() < 1e-12);
        assert_eq!(report.probability, 99);
        assert_eq!(report.authenticity, Authenticity::Authentic);
        assert!(!report.warning);

        let text = report.to_string();
        assert!(text.contains("back.jpg: FAKE"));
        assert!(text.contains("Authenticity: 99% (authentic)"));
        assert!(!text.contains("Warning"));
    }

    #[test]
    fn test_package_report_warns_below_suspicious() {
        let report = PackageReport::new(vec![photo("front.jpg", -0.05), photo("left.jpg", 0.01)]);

        assert_eq!(report.probability, 0);
        assert_eq!(report.authenticity, Authenticity::Counterfeit);
        assert!(report.warning);
        assert!(report.to_string().contains("Warning"));

        let json = report.to_json().unwrap();
        assert!(json.contains("\"authenticity\": \"counterfeit\""));
        assert!(json.contains("\"warning\": true"));
    }

    #[test]
    fn test_empty_package_is_counterfeit() {
        let report = PackageReport::new(Vec::new());
        assert_eq!(report.average_distance, EMPTY_PACKAGE_DISTANCE);
        assert_eq!(report.probability, 0);
        assert!(report.warning);
    }
}

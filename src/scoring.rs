use std::fmt;

use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{boundary::BoundaryModel, error::Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Inlier,
    Outlier,
}

impl Label {
    /// Zero lies on the boundary and counts as inside.
    pub fn from_distance(signed_distance: f64) -> Self {
        if signed_distance >= 0.0 {
            Label::Inlier
        } else {
            Label::Outlier
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Real,
    Fake,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Real => write!(f, "REAL"),
            Verdict::Fake => write!(f, "FAKE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    None,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    /// Buckets `|signed_distance|` measured in units of the training score
    /// spread.
    pub fn from_distance(signed_distance: f64, score_scale: f64) -> Self {
        let scale = if score_scale > 0.0 { score_scale } else { 1.0 };
        match signed_distance.abs() / scale {
            s if s < 0.1 => ConfidenceLevel::None,
            s if s < 0.5 => ConfidenceLevel::Low,
            s if s < 1.0 => ConfidenceLevel::Medium,
            s if s < 2.0 => ConfidenceLevel::High,
            _ => ConfidenceLevel::VeryHigh,
        }
    }
}

/// Shift applied to the averaged distance before it is mapped to a
/// percentage, so a package sitting exactly on the boundary leans authentic.
pub const AUTHENTICITY_OFFSET: f64 = 0.001;

/// Steepness of the distance-to-percentage curve.
pub const AUTHENTICITY_SENSITIVITY: f64 = 2000.0;

/// Maps an averaged signed distance onto a 0-100 authenticity percentage.
///
/// Positive distances saturate towards 100 and negative ones towards 0,
/// with 50 at `-AUTHENTICITY_OFFSET`.
pub fn authenticity_probability(average_distance: f64) -> u8 {
    let adjusted = average_distance + AUTHENTICITY_OFFSET;
    let probability = if adjusted > 0.0 {
        50.0 + 50.0 * (1.0 - (-adjusted * AUTHENTICITY_SENSITIVITY).exp())
    } else {
        50.0 - 50.0 * (1.0 - (adjusted * AUTHENTICITY_SENSITIVITY).exp())
    };
    if probability.is_nan() {
        return 0;
    }
    probability.round().clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authenticity {
    Authentic,
    Moderate,
    Suspicious,
    Counterfeit,
}

impl Authenticity {
    pub fn from_probability(probability: u8) -> Self {
        match probability {
            85.. => Authenticity::Authentic,
            70..=84 => Authenticity::Moderate,
            55..=69 => Authenticity::Suspicious,
            _ => Authenticity::Counterfeit,
        }
    }

    /// Packages below the suspicious tier carry a warning.
    pub fn is_warning(&self) -> bool {
        *self == Authenticity::Counterfeit
    }
}

impl fmt::Display for Authenticity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authenticity::Authentic => write!(f, "authentic"),
            Authenticity::Moderate => write!(f, "moderately authentic"),
            Authenticity::Suspicious => write!(f, "suspicious"),
            Authenticity::Counterfeit => write!(f, "likely counterfeit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub label: Label,
    pub signed_distance: f64,
}

impl Decision {
    pub fn from_distance(signed_distance: f64) -> Self {
        Self {
            label: Label::from_distance(signed_distance),
            signed_distance,
        }
    }

    pub fn verdict(&self) -> Verdict {
        match self.label {
            Label::Inlier => Verdict::Real,
            Label::Outlier => Verdict::Fake,
        }
    }

    pub fn is_inlier(&self) -> bool {
        self.label == Label::Inlier
    }
}

/// Read-only evaluation of a fitted boundary.
pub struct Scorer<'m> {
    model: &'m BoundaryModel,
}

impl<'m> Scorer<'m> {
    pub fn new(model: &'m BoundaryModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &BoundaryModel {
        self.model
    }

    pub fn score(&self, embedding: ArrayView1<'_, f32>) -> Result<Decision> {
        let distance = self.model.decision_function(embedding)?;
        Ok(Decision::from_distance(distance))
    }

    /// Scores every row; rows are independent so they run in parallel.
    pub fn score_batch(&self, embeddings: ArrayView2<'_, f32>) -> Result<Vec<Decision>> {
        (0..embeddings.nrows())
            .into_par_iter()
            .map(|i| self.score(embeddings.row(i)))
            .collect()
    }

    pub fn confidence(&self, decision: &Decision) -> ConfidenceLevel {
        ConfidenceLevel::from_distance(decision.signed_distance, self.model.score_scale())
    }
}

pub fn score(model: &BoundaryModel, embedding: ArrayView1<'_, f32>) -> Result<Decision> {
    Scorer::new(model).score(embedding)
}

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    boundary::{BoundaryFitter, BoundaryModel, FitParams},
    collector::{DEFAULT_BATCH_SIZE, EmbeddingCollector},
    error::{DetectorError, Result},
    extractor::FeatureExtractor,
    image_utils::load_image,
    preprocess::CanonicalTransform,
    report::{InspectionReport, PackageReport, TrainingReport},
    scoring::Scorer,
};

pub mod boundary;
pub mod collector;
pub mod dataset;
pub mod error;
pub mod extractor;
pub mod image_utils;
pub mod preprocess;
pub mod report;
pub mod scoring;

pub const DEFAULT_MODEL_NAME: &str = "vit_base_patch16_224";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_name: String,
    pub weights_dir: PathBuf,
    pub boundary_path: PathBuf,
    pub batch_size: usize,
    pub fit: FitParams,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            weights_dir: PathBuf::from("models"),
            boundary_path: PathBuf::from("one_class_svm.json"),
            batch_size: DEFAULT_BATCH_SIZE,
            fit: FitParams::default(),
        }
    }
}

impl DetectorConfig {
    /// Reads a JSON config; absent keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DetectorError::InputNotFound(path.to_path_buf()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    pub fn with_weights_dir<P: Into<PathBuf>>(mut self, weights_dir: P) -> Self {
        self.weights_dir = weights_dir.into();
        self
    }

    pub fn with_boundary_path<P: Into<PathBuf>>(mut self, boundary_path: P) -> Self {
        self.boundary_path = boundary_path.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_fit_params(mut self, fit: FitParams) -> Self {
        self.fit = fit;
        self
    }
}

/// Builds a boundary from a directory of genuine packaging images.
pub struct Trainer {
    config: DetectorConfig,
}

impl Trainer {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn run<P: AsRef<Path>>(&self, data_dir: P) -> Result<TrainingReport> {
        let extractor = FeatureExtractor::load(&self.config.model_name, &self.config.weights_dir)?;
        self.run_with(&extractor, data_dir)
    }

    /// Same as [`Trainer::run`] with an already constructed extractor.
    pub fn run_with<P: AsRef<Path>>(
        &self,
        extractor: &FeatureExtractor,
        data_dir: P,
    ) -> Result<TrainingReport> {
        let data_dir = data_dir.as_ref();

        info!("Step 1/3: extracting features from '{}'", data_dir.display());
        let collection = EmbeddingCollector::new(extractor)
            .with_batch_size(self.config.batch_size)
            .collect(data_dir)?;

        info!("Step 2/3: fitting the one-class boundary");
        let model = BoundaryFitter::new(self.config.fit.clone())
            .fit(collection.embeddings.view())?
            .with_encoder(extractor.model_name());

        let training_decisions = Scorer::new(&model).score_batch(collection.embeddings.view())?;

        info!("Step 3/3: saving the boundary model");
        model.save(&self.config.boundary_path)?;

        Ok(TrainingReport::new(
            data_dir,
            &self.config.boundary_path,
            &collection,
            &model,
            &training_decisions,
        ))
    }
}

/// Loaded encoder and boundary, ready to score single images.
pub struct Inspector {
    extractor: FeatureExtractor,
    model: BoundaryModel,
    transform: CanonicalTransform,
}

impl Inspector {
    pub fn load(config: &DetectorConfig) -> Result<Self> {
        let extractor = FeatureExtractor::load(&config.model_name, &config.weights_dir)?;
        let model = BoundaryModel::load(&config.boundary_path)?;
        Self::new(extractor, model)
    }

    pub fn new(extractor: FeatureExtractor, model: BoundaryModel) -> Result<Self> {
        if let Some(trained_with) = model.encoder() {
            if trained_with != extractor.model_name() {
                return Err(DetectorError::InvalidParameter(format!(
                    "boundary was fit with encoder '{}' but '{}' is loaded",
                    trained_with,
                    extractor.model_name()
                )));
            }
        }
        if model.embedding_dim() != extractor.embedding_dim() {
            return Err(DetectorError::InvalidParameter(format!(
                "boundary expects {}-dimensional embeddings but the encoder produces {}",
                model.embedding_dim(),
                extractor.embedding_dim()
            )));
        }

        Ok(Self {
            extractor,
            model,
            transform: CanonicalTransform::new(),
        })
    }

    pub fn model(&self) -> &BoundaryModel {
        &self.model
    }

    pub fn inspect<P: AsRef<Path>>(&self, image_path: P) -> Result<InspectionReport> {
        let image_path = image_path.as_ref();
        let image = load_image(image_path)?;
        let tensor = self.transform.apply(&image);
        let embedding = self.extractor.embed_one(&tensor)?;

        let scorer = Scorer::new(&self.model);
        let decision = scorer.score(embedding.view())?;
        info!(
            "'{}' scored {:.4} ({})",
            image_path.display(),
            decision.signed_distance,
            decision.verdict()
        );

        Ok(InspectionReport::new(image_path, &decision, scorer.confidence(&decision)))
    }

    /// Scores several photos of one package (front, back, sides, barcode)
    /// and folds them into a single authenticity call. Any unreadable photo
    /// fails the whole package.
    pub fn inspect_many<I, P>(&self, image_paths: I) -> Result<PackageReport>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let photos = image_paths
            .into_iter()
            .map(|path| self.inspect(path))
            .collect::<Result<Vec<_>>>()?;
        if photos.is_empty() {
            return Err(DetectorError::InvalidParameter(
                "at least one photo is required to inspect a package".into(),
            ));
        }

        let report = PackageReport::new(photos);
        info!(
            "Package of {} photo(s) averaged {:.4}: {}% {}",
            report.photos.len(),
            report.average_distance,
            report.probability,
            report.authenticity
        );
        Ok(report)
    }
}

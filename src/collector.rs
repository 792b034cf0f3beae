use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use ndarray::{Array2, Axis, concatenate, stack};
use rayon::prelude::*;

use crate::{
    error::{DetectorError, Result},
    extractor::FeatureExtractor,
    image_utils::load_image,
    preprocess::{CanonicalTransform, Tensor},
};

pub const DEFAULT_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

impl SkippedFile {
    /// Logs the one warning emitted for an unreadable file and records it.
    fn logged(path: &Path, err: &DetectorError) -> Self {
        warn!("Could not load image '{}', skipping: {}", path.display(), err);
        Self {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }
}

/// Embeddings of every readable image in a training directory.
#[derive(Debug)]
pub struct Collection {
    /// `(N, D)`, one row per entry of `sources`.
    pub embeddings: Array2<f32>,
    pub sources: Vec<PathBuf>,
    /// One entry per warning logged while loading.
    pub skipped: Vec<SkippedFile>,
}

impl Collection {
    pub fn len(&self) -> usize {
        self.embeddings.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.nrows() == 0
    }
}

#[derive(Default)]
struct PreparedBatch {
    tensors: Vec<Tensor>,
    sources: Vec<PathBuf>,
    skipped: Vec<SkippedFile>,
}

pub struct EmbeddingCollector<'a> {
    extractor: &'a FeatureExtractor,
    transform: CanonicalTransform,
    batch_size: usize,
}

impl<'a> EmbeddingCollector<'a> {
    pub fn new(extractor: &'a FeatureExtractor) -> Self {
        Self {
            extractor,
            transform: CanonicalTransform::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn collect<P: AsRef<Path>>(&self, dir: P) -> Result<Collection> {
        let dir = dir.as_ref();
        let files = list_files(dir)?;
        if files.is_empty() {
            return Err(DetectorError::EmptyDataset(dir.to_path_buf()));
        }

        let chunks = files.chunks(self.batch_size).collect::<Vec<_>>();
        info!(
            "Collecting embeddings for {} files in {} batch(es) of up to {}",
            files.len(),
            chunks.len(),
            self.batch_size
        );

        let mut blocks = Vec::with_capacity(chunks.len());
        let mut sources = Vec::with_capacity(files.len());
        let mut skipped = Vec::new();

        let mut pending = Some(self.prepare(chunks[0]));

        for index in 0..chunks.len() {
            let current = pending.take().unwrap_or_default();

            // Decoding the next batch overlaps with embedding this one.
            let (embedded, next) = rayon::join(
                || self.embed_batch(&current),
                || chunks.get(index + 1).map(|chunk| self.prepare(chunk)),
            );
            pending = next;

            if let Some(block) = embedded? {
                debug!(
                    "Batch {}/{}: {} embedding(s)",
                    index + 1,
                    chunks.len(),
                    block.nrows()
                );
                blocks.push(block);
            }

            sources.extend(current.sources);
            skipped.extend(current.skipped);
        }

        if blocks.is_empty() {
            return Err(DetectorError::EmptyDataset(dir.to_path_buf()));
        }

        let views = blocks.iter().map(|block| block.view()).collect::<Vec<_>>();
        let embeddings = concatenate(Axis(0), &views)
            .map_err(|e| DetectorError::Encoder(e.to_string()))?;

        info!(
            "Extracted {} feature vectors of dimension {} ({} file(s) skipped)",
            embeddings.nrows(),
            embeddings.ncols(),
            skipped.len()
        );

        Ok(Collection {
            embeddings,
            sources,
            skipped,
        })
    }

    fn prepare(&self, chunk: &[PathBuf]) -> PreparedBatch {
        let results = chunk
            .par_iter()
            .map(|path| {
                let tensor = load_image(path).map(|image| self.transform.apply(&image));
                (path, tensor)
            })
            .collect::<Vec<_>>();

        let mut batch = PreparedBatch::default();
        for (path, result) in results {
            match result {
                Ok(tensor) => {
                    batch.tensors.push(tensor);
                    batch.sources.push(path.clone());
                }
                Err(err) => batch.skipped.push(SkippedFile::logged(path, &err)),
            }
        }

        batch
    }

    fn embed_batch(&self, batch: &PreparedBatch) -> Result<Option<Array2<f32>>> {
        if batch.tensors.is_empty() {
            return Ok(None);
        }

        let views = batch.tensors.iter().map(|tensor| tensor.view()).collect::<Vec<_>>();
        let stacked = stack(Axis(0), &views)
            .map_err(|e| DetectorError::Encoder(e.to_string()))?;

        self.extractor.embed(stacked.view()).map(Some)
    }
}

/// Regular files directly inside `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(DetectorError::EmptyDataset(dir.to_path_buf()));
    }

    let mut files = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect::<Vec<_>>();
    files.sort();

    Ok(files)
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::extractor::PatchProjectionEncoder;

    fn write_png(dir: &Path, name: &str, shade: u8) {
        let image = RgbImage::from_fn(48, 40, |x, y| {
            Rgb([shade, (x * 5) as u8, (y * 6) as u8])
        });
        image.save(dir.join(name)).unwrap();
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(PatchProjectionEncoder::seeded("test", 6, 11))
    }

    #[test]
    fn test_corrupt_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write_png(dir.path(), &format!("real_{}.png", i), (i * 40) as u8);
        }
        fs::write(dir.path().join("broken.jpg"), b"\xff\xd8\xff garbage").unwrap();

        let extractor = extractor();
        let collection = EmbeddingCollector::new(&extractor)
            .with_batch_size(2)
            .collect(dir.path())
            .unwrap();

        assert_eq!(collection.embeddings.dim(), (5, 6));
        assert_eq!(collection.sources.len(), 5);
        assert_eq!(collection.skipped.len(), 1);
        assert!(collection.skipped[0].path.ends_with("broken.jpg"));
        assert!(!collection.skipped[0].reason.is_empty());
    }

    #[test]
    fn test_skipped_entry_mirrors_load_error() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "real.png", 90);
        let broken = dir.path().join("broken.png");
        fs::write(&broken, b"not a png").unwrap();

        let extractor = extractor();
        let collector = EmbeddingCollector::new(&extractor);
        let batch = collector.prepare(&[dir.path().join("real.png"), broken.clone()]);

        let expected = load_image(&broken).err().unwrap().to_string();
        assert_eq!(batch.sources.len(), 1);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].path, broken);
        assert_eq!(batch.skipped[0].reason, expected);
    }

    #[test]
    fn test_rows_follow_sorted_sources() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", 10);
        write_png(dir.path(), "a.png", 200);

        let extractor = extractor();
        let collection = EmbeddingCollector::new(&extractor).collect(dir.path()).unwrap();

        let direct = extractor
            .embed_one(&CanonicalTransform::new().apply(&load_image(dir.path().join("a.png")).unwrap()))
            .unwrap();
        assert!(collection.sources[0].ends_with("a.png"));
        for (a, b) in collection.embeddings.row(0).iter().zip(direct.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_only_corrupt_files_is_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"nope").unwrap();
        fs::write(dir.path().join("b.png"), b"still nope").unwrap();

        let extractor = extractor();
        let err = EmbeddingCollector::new(&extractor).collect(dir.path()).unwrap_err();
        assert!(matches!(err, DetectorError::EmptyDataset(_)));
    }

    #[test]
    fn test_missing_or_empty_directory_is_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = extractor();
        let collector = EmbeddingCollector::new(&extractor);

        assert!(matches!(
            collector.collect(dir.path()).unwrap_err(),
            DetectorError::EmptyDataset(_)
        ));
        assert!(matches!(
            collector.collect(dir.path().join("missing")).unwrap_err(),
            DetectorError::EmptyDataset(_)
        ));
    }

    #[test]
    fn test_subdirectories_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "top.png", 1);
        fs::create_dir(dir.path().join("nested")).unwrap();
        write_png(&dir.path().join("nested"), "inner.png", 2);

        let files = list_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
    }
}

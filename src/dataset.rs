use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use crate::error::{DetectorError, Result};

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Debug, Clone, Default)]
pub struct PreparationReport {
    pub copied: usize,
    /// Files whose sanitized name collided and received a numeric suffix.
    pub renamed: usize,
    pub destination: PathBuf,
}

/// Keeps alphanumerics, `_`, `.` and `-`; everything else becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Flattens every image found under `source` into `dest`, which is emptied
/// first.
pub fn prepare_dataset<P: AsRef<Path>, Q: AsRef<Path>>(source: P, dest: Q) -> Result<PreparationReport> {
    let source = source.as_ref();
    let dest = dest.as_ref();

    if !source.is_dir() {
        return Err(DetectorError::InputNotFound(source.to_path_buf()));
    }

    if dest.exists() {
        if fs::canonicalize(source)?.starts_with(fs::canonicalize(dest)?) {
            return Err(DetectorError::InvalidParameter(format!(
                "destination '{}' contains the source directory",
                dest.display()
            )));
        }
        info!("Removing existing directory '{}'", dest.display());
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    let mut sources = Vec::new();
    walk(source, &mut sources)?;
    sources.sort();

    info!("Found {} image file(s) under '{}'", sources.len(), source.display());

    let mut report = PreparationReport {
        destination: dest.to_path_buf(),
        ..Default::default()
    };
    let mut taken = HashSet::new();

    for path in sources {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!("Skipping '{}': file name is not valid UTF-8", path.display());
            continue;
        };

        let sanitized = sanitize_file_name(name);
        let target_name = unique_name(&sanitized, &taken);
        if target_name != sanitized {
            report.renamed += 1;
        }

        let target = dest.join(&target_name);
        debug!("Copying '{}' to '{}'", path.display(), target.display());
        fs::copy(&path, &target)?;

        taken.insert(target_name);
        report.copied += 1;
    }

    info!(
        "Copied {} image(s) into '{}' ({} renamed)",
        report.copied,
        dest.display(),
        report.renamed
    );

    Ok(report)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else if path.is_file() && is_image_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn unique_name(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };

    (1..)
        .map(|n| format!("{}_{}{}", stem, n, ext))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

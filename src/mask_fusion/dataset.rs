//! File layer for evaluation runs
//!
//! Images, weak masks and ground truth are matched by file name across
//! directories. Masks are read as grayscale and written as 0/255 PNG.

use std::fs;
use std::path::{Path, PathBuf};

use image::{Luma, RgbImage};

use crate::error::FusionError;
use crate::mask_fusion::oracle::BoundingBox;
use crate::mask_fusion::weak_mask::{to_mask_image, LabelGrid};
use crate::Image;

/// Where the per-image companion files live
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetLayout {
    /// Pre-computed auxiliary weak masks, named like the images
    pub auxiliary_dir: Option<PathBuf>,
    /// Ground-truth masks, named like the images
    pub ground_truth_dir: Option<PathBuf>,
    /// Output directory for fused masks
    pub save_dir: Option<PathBuf>,
}

impl DatasetLayout {
    pub fn with_auxiliary_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.auxiliary_dir = Some(dir.into());
        self
    }

    pub fn with_ground_truth_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ground_truth_dir = Some(dir.into());
        self
    }

    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    pub fn auxiliary_path(&self, image_path: &Path) -> Option<PathBuf> {
        companion_path(self.auxiliary_dir.as_deref(), image_path)
    }

    pub fn ground_truth_path(&self, image_path: &Path) -> Option<PathBuf> {
        companion_path(self.ground_truth_dir.as_deref(), image_path)
    }

    /// `<save_dir>/<image stem>.png`; masks are never written lossy.
    pub fn output_path(&self, image_path: &Path) -> Option<PathBuf> {
        let stem = image_path.file_stem()?;
        let dir = self.save_dir.as_deref()?;
        Some(dir.join(stem).with_extension("png"))
    }
}

fn companion_path(dir: Option<&Path>, image_path: &Path) -> Option<PathBuf> {
    Some(dir?.join(image_path.file_name()?))
}

/// Key under which an image is reported: its file name.
pub fn image_identity(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Regular files of `dir`, sorted by name.
pub fn list_directory(dir: &Path) -> Result<Vec<PathBuf>, FusionError> {
    let entries = fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()).map_err(|e| io_error(dir, e)))
        .collect::<Result<Vec<_>, _>>()?;
    paths.retain(|path| path.is_file());
    paths.sort();
    Ok(paths)
}

pub fn load_rgb_image(path: &Path) -> Result<RgbImage, FusionError> {
    ensure_exists(path)?;
    let image = image::open(path).map_err(|e| io_error(path, e))?;
    Ok(image.to_rgb8())
}

/// Loads a mask as 8-bit grayscale; non-zero pixels are foreground.
pub fn load_mask(path: &Path) -> Result<Image<Luma<u8>>, FusionError> {
    ensure_exists(path)?;
    let image = image::open(path).map_err(|e| io_error(path, e))?;
    Ok(image.to_luma8())
}

/// Writes `labels` as a 0/255 mask, creating parent directories.
pub fn save_mask(path: &Path, labels: &LabelGrid) -> Result<(), FusionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    to_mask_image(labels)
        .save(path)
        .map_err(|e| io_error(path, e))
}

pub fn load_weak_supervision(path: &Path) -> Result<Vec<BoundingBox>, FusionError> {
    ensure_exists(path)?;
    let text = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    parse_weak_supervision(&text)
}

/// Parses comma-separated box rows.
///
/// The last four columns of every row are the box `x0,y0,x1,y1`; leading
/// columns (ids, class labels) are ignored. Blank lines are skipped.
///
/// # Errors
///
/// * `FusionError::InvalidParameter` - When a row has fewer than four
///   columns or a non-numeric value
pub fn parse_weak_supervision(text: &str) -> Result<Vec<BoundingBox>, FusionError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            let values = line
                .split(',')
                .map(|token| parse_coordinate(token, number + 1))
                .collect::<Result<Vec<_>, _>>()?;
            match values.as_slice() {
                [.., x0, y0, x1, y1] => Ok(BoundingBox::new(*x0, *y0, *x1, *y1)),
                _ => Err(FusionError::InvalidParameter(format!(
                    "line {}: expected at least 4 columns, got {}",
                    number + 1,
                    values.len()
                ))),
            }
        })
        .collect()
}

fn parse_coordinate(token: &str, line: usize) -> Result<i64, FusionError> {
    let token = token.trim();
    token
        .parse::<i64>()
        .ok()
        .or_else(|| {
            token
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| v as i64)
        })
        .ok_or_else(|| {
            FusionError::InvalidParameter(format!("line {line}: `{token}` is not a number"))
        })
}

fn ensure_exists(path: &Path) -> Result<(), FusionError> {
    if path.exists() {
        Ok(())
    } else {
        Err(FusionError::MissingInput(path.display().to_string()))
    }
}

fn io_error(path: &Path, error: impl std::fmt::Display) -> FusionError {
    FusionError::Io {
        path: path.to_path_buf(),
        message: error.to_string(),
    }
}

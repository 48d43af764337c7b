//! Result artifacts and their download.
//!
//! A completed run yields a [`ResultArtifact`] reference. Downloading
//! renders the placeholder image and writes it under the fixed name
//! [`RESULT_FILE_NAME`].

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageFormat, Rgb, RgbImage};
use serde::Serialize;
use uuid::Uuid;

pub const RESULT_FILE_NAME: &str = "magicswap-result.jpg";

const PLACEHOLDER_SIZE: u32 = 400;

/// Reference to the output of one processing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultArtifact {
    pub id: Uuid,
    pub file_name: String,
    pub reference: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("failed to render result: {0}")]
    Render(#[from] image::ImageError),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ResultArtifact {
    /// A fresh placeholder artifact.
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: RESULT_FILE_NAME.to_string(),
            reference: format!(
                "placeholder.svg?height={PLACEHOLDER_SIZE}&width={PLACEHOLDER_SIZE}"
            ),
            width: PLACEHOLDER_SIZE,
            height: PLACEHOLDER_SIZE,
        }
    }

    /// Encode the artifact as JPEG bytes.
    pub fn render(&self) -> Result<Vec<u8>, DownloadError> {
        let (w, h) = (self.width.max(1), self.height.max(1));
        // Purple-to-blue diagonal gradient.
        let img = RgbImage::from_fn(w, h, |x, y| {
            let t = (x + y) as f32 / (w + h) as f32;
            let r = (147.0 * (1.0 - t) + 37.0 * t) as u8;
            let g = (51.0 * (1.0 - t) + 99.0 * t) as u8;
            let b = (234.0 * (1.0 - t) + 235.0 * t) as u8;
            Rgb([r, g, b])
        });

        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Jpeg)?;
        Ok(out.into_inner())
    }
}

/// Render `artifact` and write it into `dir` as [`RESULT_FILE_NAME`].
///
/// # Errors
///
/// [`DownloadError::Render`] if JPEG encoding fails and
/// [`DownloadError::Write`] if the file cannot be written.
pub async fn download(artifact: &ResultArtifact, dir: &Path) -> Result<PathBuf, DownloadError> {
    let bytes = artifact.render()?;
    let path = dir.join(&artifact.file_name);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| DownloadError::Write {
            path: path.clone(),
            source: e,
        })?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "result downloaded");
    Ok(path)
}

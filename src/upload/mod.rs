//! Upload staging: candidate files, validation, previews.
//!
//! A [`CandidateFile`] is what the file picker (or a drop) hands over:
//! declared metadata plus a body that has not been read yet. Validation
//! looks only at the metadata. Reading the body and encoding the
//! [`Preview`] happens later, off the workflow loop, in [`stage`].

pub mod preview;
pub mod validate;

use std::path::{Path, PathBuf};

use serde::Serialize;

pub use preview::Preview;
pub use validate::{MAX_UPLOAD_BYTES, RejectReason, ValidationOutcome, validate};

/// Declared metadata of a candidate file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Declared media type, e.g. `image/png`.
    pub media_type: String,
}

/// Where a candidate's bytes live.
#[derive(Debug, Clone)]
pub enum FileBody {
    Disk(PathBuf),
    Memory(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub info: FileInfo,
    pub body: FileBody,
}

/// An accepted file together with its preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedImage {
    pub file: FileInfo,
    #[serde(skip)]
    pub preview: Preview,
}

/// Failure to read a candidate's bytes.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("declared {declared} bytes but read {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
}

impl ReadError {
    pub fn user_message(&self) -> &'static str {
        "Failed to read the image file. Please try again."
    }
}

impl CandidateFile {
    /// Describe a file on disk the way a browser file picker would.
    ///
    /// Size comes from the file's metadata; the media type is guessed
    /// from the extension, falling back to `application/octet-stream`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file's metadata cannot be read.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let media_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self {
            info: FileInfo {
                name,
                size: metadata.len(),
                media_type,
            },
            body: FileBody::Disk(path.to_path_buf()),
        })
    }

    pub fn in_memory(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            info: FileInfo {
                name: name.into(),
                size: bytes.len() as u64,
                media_type: media_type.into(),
            },
            body: FileBody::Memory(bytes),
        }
    }

    /// Read the body, checking it still matches the declared size.
    ///
    /// # Errors
    ///
    /// [`ReadError::Io`] if the file cannot be read and
    /// [`ReadError::SizeMismatch`] if it changed size since it was described.
    pub async fn read(&self) -> Result<Vec<u8>, ReadError> {
        let bytes = match &self.body {
            FileBody::Disk(path) => tokio::fs::read(path).await.map_err(|e| ReadError::Io {
                path: path.clone(),
                source: e,
            })?,
            FileBody::Memory(bytes) => bytes.clone(),
        };

        let actual = bytes.len() as u64;
        if actual != self.info.size {
            return Err(ReadError::SizeMismatch {
                declared: self.info.size,
                actual,
            });
        }
        Ok(bytes)
    }
}

/// Read a candidate and build its [`StagedImage`].
///
/// # Errors
///
/// Any [`ReadError`] from [`CandidateFile::read`].
pub async fn stage(file: CandidateFile) -> Result<StagedImage, ReadError> {
    let bytes = file.read().await?;
    let preview = Preview::encode(&file.info.media_type, &bytes);
    tracing::debug!(
        name = %file.info.name,
        bytes = bytes.len(),
        preview_len = preview.encoded_len(),
        "preview encoded"
    );
    Ok(StagedImage {
        file: file.info,
        preview,
    })
}

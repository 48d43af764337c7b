//! Upload validation: declared media type and size checks.
//!
//! Pure functions over [`FileInfo`]. Nothing here touches file contents;
//! the bytes are only read once a file has been accepted.

use serde::Serialize;

use super::FileInfo;

/// Largest accepted upload, in bytes (10 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Why a candidate file was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("unsupported type")]
    UnsupportedType,
    #[error("too large")]
    TooLarge,
}

impl RejectReason {
    /// Message shown to the user in the notice slot.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::UnsupportedType => "Please upload a valid image file (JPG, PNG, GIF, etc.)",
            Self::TooLarge => "File size must be less than 10MB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl ValidationOutcome {
    pub fn into_result(self) -> Result<(), RejectReason> {
        match self {
            Self::Accepted => Ok(()),
            Self::Rejected(reason) => Err(reason),
        }
    }
}

/// Check a candidate against the type and size limits.
///
/// The type check runs first, so a large non-image reports
/// `UnsupportedType`.
pub fn validate(file: &FileInfo, max_bytes: u64) -> ValidationOutcome {
    if !file.media_type.starts_with("image/") {
        return ValidationOutcome::Rejected(RejectReason::UnsupportedType);
    }
    if file.size > max_bytes {
        return ValidationOutcome::Rejected(RejectReason::TooLarge);
    }
    ValidationOutcome::Accepted
}

//! Preview encoding: `data:` URIs of the exact uploaded bytes.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Serialize;

/// Self-contained preview of an accepted image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub media_type: String,
    pub data_uri: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("not a base64 data URI")]
    NotDataUri,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl Preview {
    pub fn encode(media_type: &str, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            data_uri: format!("data:{};base64,{}", media_type, BASE64.encode(bytes)),
        }
    }

    /// Recover the original bytes from the data URI.
    pub fn decode(&self) -> Result<Vec<u8>, PreviewError> {
        let payload = self
            .data_uri
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
            .map(|(_, payload)| payload)
            .ok_or(PreviewError::NotDataUri)?;
        Ok(BASE64.decode(payload)?)
    }

    /// Length of the encoded URI in bytes.
    pub fn encoded_len(&self) -> usize {
        self.data_uri.len()
    }
}

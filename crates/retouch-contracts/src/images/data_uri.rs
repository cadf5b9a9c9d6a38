//! Lossless conversion between raw image payloads and `data:` URIs.
//!
//! Images travel through the editor as `data:{mime};base64,{payload}` strings
//! so nothing in the core needs a filesystem.

use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::artifact::{extension_for_mime, ImageArtifact, ImageBlob, RawUpload};
use crate::error::EditorError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataUri(String);

impl DataUri {
    /// Validates `raw` as an embedded image without keeping the decoded bytes.
    pub fn parse(raw: &str) -> Result<Self, EditorError> {
        split_data_uri(raw)?;
        Ok(Self(raw.trim().to_string()))
    }

    pub fn from_parts(mime_type: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{mime_type};base64,{}", BASE64.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn mime_type(&self) -> &str {
        split_data_uri(&self.0)
            .map(|(mime, _)| mime)
            .unwrap_or("image/png")
    }

    pub fn to_artifact(&self) -> Result<ImageArtifact, EditorError> {
        let (mime, payload) = split_data_uri(&self.0)?;
        let bytes = decode_payload(payload)?;
        Ok(ImageArtifact::new(bytes, mime))
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&ImageArtifact> for DataUri {
    fn from(artifact: &ImageArtifact) -> Self {
        Self::from_parts(artifact.mime_type(), artifact.bytes())
    }
}

/// Embeds an uploaded payload. Anything that is not an `image/*` type is
/// rejected.
pub fn encode(upload: &RawUpload) -> Result<DataUri, EditorError> {
    let mime = upload
        .detect_mime()
        .ok_or_else(|| EditorError::UnsupportedImageType("unknown".to_string()))?;
    if !is_image_mime(&mime) {
        return Err(EditorError::UnsupportedImageType(mime));
    }
    Ok(DataUri::from_parts(&mime, &upload.bytes))
}

/// Turns a data URI back into a named binary image.
///
/// The filename keeps the stem of `suggested_filename`; when the hint carries
/// no extension one is derived from the MIME type.
pub fn decode(data_uri: &str, suggested_filename: &str) -> Result<ImageBlob, EditorError> {
    let (mime, payload) = split_data_uri(data_uri)?;
    let bytes = decode_payload(payload)?;
    Ok(ImageBlob {
        filename: derive_filename(suggested_filename, mime),
        artifact: ImageArtifact::new(bytes, mime),
    })
}

fn split_data_uri(raw: &str) -> Result<(&str, &str), EditorError> {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("data:") else {
        return Err(EditorError::MalformedDataUri(
            "missing 'data:' scheme".to_string(),
        ));
    };
    let Some((header, payload)) = rest.split_once(',') else {
        return Err(EditorError::MalformedDataUri(
            "missing ',' separator".to_string(),
        ));
    };
    let mut params = header.split(';');
    let mime = params.next().unwrap_or("").trim();
    if !is_image_mime(mime) {
        return Err(EditorError::MalformedDataUri(format!(
            "'{mime}' is not an image type"
        )));
    }
    if !params.any(|param| param.trim().eq_ignore_ascii_case("base64")) {
        return Err(EditorError::MalformedDataUri(
            "payload is not base64 encoded".to_string(),
        ));
    }
    if payload.trim().is_empty() {
        return Err(EditorError::MalformedDataUri("empty payload".to_string()));
    }
    Ok((mime, payload.trim()))
}

/// Media type names are case-insensitive, so `image/PNG` qualifies as written.
fn is_image_mime(mime: &str) -> bool {
    mime.get(.."image/".len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
        && mime.len() > "image/".len()
}

fn decode_payload(payload: &str) -> Result<Vec<u8>, EditorError> {
    BASE64
        .decode(payload.as_bytes())
        .map_err(|err| EditorError::MalformedDataUri(format!("base64 decode failed: {err}")))
}

fn derive_filename(hint: &str, mime: &str) -> String {
    let trimmed = hint.trim();
    let base = Path::new(trimmed)
        .file_name()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .unwrap_or("image");
    if Path::new(base).extension().is_some() {
        return base.to_string();
    }
    format!("{base}.{}", extension_for_mime(mime))
}

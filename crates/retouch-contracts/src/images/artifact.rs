use std::path::Path;

use image::ImageFormat;
use sha2::{Digest, Sha256};

/// One image held by a version: the raw payload and its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    bytes: Vec<u8>,
    mime_type: String,
}

impl ImageArtifact {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }

    /// Hex sha256 of the payload, used in event logs instead of the bytes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }
}

/// A decoded image paired with the filename it should be saved under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub filename: String,
    pub artifact: ImageArtifact,
}

/// Raw bytes handed over by a file picker or drop target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawUpload {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
    pub declared_mime: Option<String>,
}

impl RawUpload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ..Self::default()
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Self {
            filename: path
                .file_name()
                .and_then(|value| value.to_str())
                .map(str::to_string),
            bytes,
            declared_mime: None,
        })
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.declared_mime = Some(mime.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Declared type first, kept as written, then the payload's magic bytes,
    /// then the file extension.
    pub fn detect_mime(&self) -> Option<String> {
        if let Some(declared) = self
            .declared_mime
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return Some(declared.to_string());
        }
        if let Ok(format) = image::guess_format(&self.bytes) {
            return Some(format.to_mime_type().to_string());
        }
        let ext = self
            .filename
            .as_deref()
            .map(Path::new)
            .and_then(Path::extension)
            .and_then(|value| value.to_str())?;
        ImageFormat::from_extension(ext).map(|format| format.to_mime_type().to_string())
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.trim().to_ascii_lowercase();
    let subtype = lowered.split_once('/').map(|(_, sub)| sub).unwrap_or("");
    match subtype {
        "jpeg" | "jpg" | "pjpeg" => "jpg",
        "webp" => "webp",
        "gif" => "gif",
        "bmp" => "bmp",
        "tiff" => "tiff",
        "heic" => "heic",
        "heif" => "heif",
        "avif" => "avif",
        "svg+xml" => "svg",
        _ => "png",
    }
}

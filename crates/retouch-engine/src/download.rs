use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use retouch_contracts::images::{self, extension_for_mime, DataUri};

/// Save-to-disk collaborator for finished images.
pub trait DownloadSink {
    /// Persists `image` under a name derived from `suggested_name` and returns
    /// where it landed.
    fn download(&self, image: &DataUri, suggested_name: &str) -> anyhow::Result<PathBuf>;
}

/// Writes downloads into one output directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    out_dir: PathBuf,
}

impl DirectorySink {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

impl DownloadSink for DirectorySink {
    fn download(&self, image: &DataUri, suggested_name: &str) -> anyhow::Result<PathBuf> {
        let blob = images::decode(image.as_str(), suggested_name)?;
        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("failed creating {}", self.out_dir.display()))?;
        let path = self.out_dir.join(&blob.filename);
        fs::write(&path, blob.artifact.bytes())
            .with_context(|| format!("failed writing {}", path.display()))?;
        Ok(path)
    }
}

/// `edited-original.png`, `edited-v2.jpg`, `edited-v3-2.png`, ...
pub fn version_download_name(index: usize, image_index: usize, mime_type: &str) -> String {
    let stem = if index == 0 {
        "edited-original".to_string()
    } else {
        format!("edited-v{}", index + 1)
    };
    let suffix = if image_index > 0 {
        format!("-{}", image_index + 1)
    } else {
        String::new()
    };
    format!("{stem}{suffix}.{}", extension_for_mime(mime_type))
}

pub fn generic_download_name(mime_type: &str) -> String {
    format!(
        "edited-{}.{}",
        Utc::now().timestamp_millis(),
        extension_for_mime(mime_type)
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use retouch_contracts::images::DataUri;

    use super::{generic_download_name, version_download_name, DirectorySink, DownloadSink};

    #[test]
    fn version_names_follow_labels() {
        assert_eq!(version_download_name(0, 0, "image/png"), "edited-original.png");
        assert_eq!(version_download_name(1, 0, "image/jpeg"), "edited-v2.jpg");
        assert_eq!(version_download_name(2, 1, "image/webp"), "edited-v3-2.webp");
        assert_eq!(version_download_name(0, 2, "application/x-unknown"), "edited-original-3.png");
    }

    #[test]
    fn generic_name_is_timestamped() {
        let name = generic_download_name("image/jpeg");
        let stem = name
            .strip_prefix("edited-")
            .and_then(|rest| rest.strip_suffix(".jpg"))
            .unwrap();
        assert!(stem.parse::<i64>().is_ok());
    }

    #[test]
    fn directory_sink_writes_decoded_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let sink = DirectorySink::new(temp.path().join("nested"));
        let uri = DataUri::from_parts("image/png", b"pixels");

        let path = sink.download(&uri, "edited-v2.png")?;
        assert_eq!(path, temp.path().join("nested").join("edited-v2.png"));
        assert_eq!(fs::read(&path)?, b"pixels");

        let bare = sink.download(&DataUri::from_parts("image/jpeg", b"j"), "edited-original")?;
        assert!(bare.ends_with("edited-original.jpg"));
        Ok(())
    }
}

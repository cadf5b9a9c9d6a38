use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use retouch_contracts::images::{DataUri, ImageArtifact};
use retouch_contracts::EditorError;
use sha2::{Digest, Sha256};

use super::{require_credential, GatewayResult, ImageGateway};

const DEFAULT_SIZE: u32 = 256;
const MAX_SIZE: u32 = 2048;

/// Offline gateway: renders a solid colour chosen from the prompt and inputs.
///
/// Prompts containing `[blocked]` or `[empty]` reproduce the two model-side
/// failure shapes.
#[derive(Debug, Clone, Default)]
pub struct DryrunGateway;

impl DryrunGateway {
    pub fn new() -> Self {
        Self
    }

    fn render(
        &self,
        images: &[ImageArtifact],
        prompt: &str,
        credential: &str,
    ) -> Result<GatewayResult, EditorError> {
        require_credential(credential)?;
        if prompt.contains("[blocked]") {
            return Err(EditorError::ContentBlocked);
        }
        if prompt.contains("[empty]") {
            return Err(EditorError::NoImageReturned);
        }

        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        for image in images {
            hasher.update(image.bytes());
        }
        let digest = hasher.finalize();
        let colour = Rgb([digest[0], digest[1], digest[2]]);

        let (width, height) = images
            .first()
            .and_then(|image| image::load_from_memory(image.bytes()).ok())
            .map(|decoded| decoded.dimensions())
            .unwrap_or((DEFAULT_SIZE, DEFAULT_SIZE));
        let canvas = RgbImage::from_pixel(
            width.clamp(1, MAX_SIZE),
            height.clamp(1, MAX_SIZE),
            colour,
        );

        let mut encoded = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut encoded, ImageFormat::Png)
            .map_err(|err| EditorError::GatewayFailure(format!("dryrun encode failed: {err}")))?;

        Ok(GatewayResult {
            image: Some(DataUri::from_parts("image/png", encoded.get_ref())),
            note: Some(format!("dryrun: {prompt}")),
        })
    }
}

impl ImageGateway for DryrunGateway {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, prompt: &str, credential: &str) -> Result<GatewayResult, EditorError> {
        self.render(&[], prompt, credential)
    }

    fn edit(
        &self,
        images: &[ImageArtifact],
        prompt: &str,
        credential: &str,
    ) -> Result<GatewayResult, EditorError> {
        self.render(images, prompt, credential)
    }
}

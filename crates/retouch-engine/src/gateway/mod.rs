//! Boundary to the remote image model.
//!
//! A gateway makes exactly one attempt per call and reports every failure as
//! an [`EditorError`]; retries and recovery belong to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use retouch_contracts::images::{DataUri, ImageArtifact};
use retouch_contracts::EditorError;

use crate::config::EditorConfig;

mod dryrun;
mod gemini;

pub use dryrun::DryrunGateway;
pub use gemini::{parse_generate_content_response, GeminiGateway};

/// Normalized model output: an embedded image and/or a short text note.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GatewayResult {
    pub image: Option<DataUri>,
    pub note: Option<String>,
}

pub trait ImageGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Text-to-image.
    fn generate(&self, prompt: &str, credential: &str) -> Result<GatewayResult, EditorError>;

    /// Images plus instruction to image. `images` is the full, ordered set of
    /// the version being edited.
    fn edit(
        &self,
        images: &[ImageArtifact],
        prompt: &str,
        credential: &str,
    ) -> Result<GatewayResult, EditorError>;
}

/// A fully prepared call, detached from the session so it can run elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayRequest {
    Generate {
        prompt: String,
        credential: String,
    },
    Edit {
        images: Vec<ImageArtifact>,
        prompt: String,
        credential: String,
    },
}

impl GatewayRequest {
    pub fn prompt(&self) -> &str {
        match self {
            Self::Generate { prompt, .. } | Self::Edit { prompt, .. } => prompt,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Generate { .. } => "generate",
            Self::Edit { .. } => "edit",
        }
    }

    pub fn dispatch(&self, gateway: &dyn ImageGateway) -> Result<GatewayResult, EditorError> {
        match self {
            Self::Generate { prompt, credential } => gateway.generate(prompt, credential),
            Self::Edit {
                images,
                prompt,
                credential,
            } => gateway.edit(images, prompt, credential),
        }
    }
}

/// Rejects blank credentials before any transport work happens.
pub(crate) fn require_credential(credential: &str) -> Result<&str, EditorError> {
    let trimmed = credential.trim();
    if trimmed.is_empty() {
        return Err(EditorError::MissingCredential);
    }
    Ok(trimmed)
}

#[derive(Default)]
pub struct GatewayRegistry {
    gateways: BTreeMap<String, Arc<dyn ImageGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<G: ImageGateway + 'static>(&mut self, gateway: G) {
        self.gateways
            .insert(gateway.name().to_string(), Arc::new(gateway));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageGateway>> {
        self.gateways.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.gateways.keys().cloned().collect()
    }
}

pub fn default_gateway_registry(config: &EditorConfig) -> GatewayRegistry {
    let mut gateways = GatewayRegistry::new();
    gateways.register(DryrunGateway::new());
    gateways.register(GeminiGateway::new(config));
    gateways
}

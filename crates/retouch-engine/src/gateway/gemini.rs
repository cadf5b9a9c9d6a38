use std::time::Duration;

use anyhow::{bail, Context};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use retouch_contracts::images::{DataUri, ImageArtifact};
use retouch_contracts::EditorError;
use serde_json::{json, Value};

use super::{require_credential, GatewayResult, ImageGateway};
use crate::config::EditorConfig;

const BLOCKING_FINISH_REASONS: &[&str] =
    &["SAFETY", "IMAGE_SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST"];
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Google Generative Language `generateContent` transport.
pub struct GeminiGateway {
    api_base: String,
    model: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiGateway {
    pub fn new(config: &EditorConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn call(
        &self,
        images: &[ImageArtifact],
        prompt: &str,
        credential: &str,
    ) -> Result<GatewayResult, EditorError> {
        let credential = require_credential(credential)?;
        let payload = build_request_payload(images, prompt);
        let response_payload = self
            .post(credential, &payload)
            .map_err(|err| EditorError::from_gateway(&err))?;
        parse_generate_content_response(&response_payload)
    }

    fn post(&self, credential: &str, payload: &Value) -> anyhow::Result<Value> {
        let endpoint = self.endpoint();
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, credential)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }
}

impl ImageGateway for GeminiGateway {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, prompt: &str, credential: &str) -> Result<GatewayResult, EditorError> {
        self.call(&[], prompt, credential)
    }

    fn edit(
        &self,
        images: &[ImageArtifact],
        prompt: &str,
        credential: &str,
    ) -> Result<GatewayResult, EditorError> {
        self.call(images, prompt, credential)
    }
}

/// Images first, in version order, then the instruction text.
pub(crate) fn build_request_payload(images: &[ImageArtifact], prompt: &str) -> Value {
    let mut parts: Vec<Value> = images
        .iter()
        .map(|image| {
            let uri = DataUri::from(image);
            let encoded = uri
                .as_str()
                .split_once(',')
                .map(|(_, data)| data.to_string())
                .unwrap_or_default();
            json!({
                "inlineData": {
                    "mimeType": image.mime_type(),
                    "data": encoded,
                }
            })
        })
        .collect();
    parts.push(json!({ "text": prompt }));

    json!({
        "contents": [{
            "role": "user",
            "parts": parts,
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE", "TEXT"],
        },
    })
}

/// Scans the first candidate's parts in order. Text sets the note, inline
/// data sets the image; later parts win.
pub fn parse_generate_content_response(payload: &Value) -> Result<GatewayResult, EditorError> {
    let candidate = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first());
    let parts = candidate
        .and_then(|row| row.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = GatewayResult::default();
    for part in &parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.trim().is_empty() {
                result.note = Some(text.to_string());
            }
            continue;
        }
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let mime = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        let uri = DataUri::parse(&format!("data:{mime};base64,{data}")).map_err(|err| {
            EditorError::GatewayFailure(format!("Gemini returned an unreadable image: {err}"))
        })?;
        result.image = Some(uri);
    }

    if result.image.is_some() {
        return Ok(result);
    }

    let finish_reason = candidate
        .and_then(|row| row.get("finishReason"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let prompt_blocked = payload
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
        .is_some();
    if prompt_blocked || BLOCKING_FINISH_REASONS.contains(&finish_reason) {
        return Err(EditorError::ContentBlocked);
    }
    Err(EditorError::NoImageReturned)
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> anyhow::Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

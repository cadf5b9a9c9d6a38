/// Every failure the editing core can report.
///
/// All kinds are recovered at the session boundary and rendered through
/// [`EditorError::user_message`]; none of them is fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditorError {
    #[error("API key is missing.")]
    MissingCredential,

    #[error("Please ensure an image is uploaded and provide an editing prompt.")]
    MissingPrompt,

    #[error("The request was blocked due to safety settings. Please modify your prompt.")]
    ContentBlocked,

    #[error("The API did not return an image.")]
    NoImageReturned,

    #[error("{0}")]
    GatewayFailure(String),

    #[error("malformed data URI: {0}")]
    MalformedDataUri(String),

    #[error("index {index} is out of range for {len} item(s)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("no version is selected for editing")]
    NoCurrentVersion,

    #[error("another request is already in flight")]
    Busy,

    #[error("unsupported image type '{0}'")]
    UnsupportedImageType(String),

    #[error("the image history changed while the request was in flight; result discarded")]
    StaleResult,

    #[error("credential storage failed: {0}")]
    Storage(String),
}

impl EditorError {
    pub fn from_gateway(err: &anyhow::Error) -> Self {
        Self::GatewayFailure(format!("{err:#}"))
    }

    /// Errors produced by the remote model or its transport.
    pub fn is_gateway(&self) -> bool {
        matches!(
            self,
            Self::ContentBlocked | Self::NoImageReturned | Self::GatewayFailure(_)
        )
    }

    /// The single string shown to the user.
    pub fn user_message(&self) -> String {
        if self.is_gateway() {
            return format!("Failed to generate image: {self}");
        }
        self.to_string()
    }

    /// Stable snake_case tag used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::MissingPrompt => "missing_prompt",
            Self::ContentBlocked => "content_blocked",
            Self::NoImageReturned => "no_image_returned",
            Self::GatewayFailure(_) => "gateway_failure",
            Self::MalformedDataUri(_) => "malformed_data_uri",
            Self::IndexOutOfRange { .. } => "index_out_of_range",
            Self::NoCurrentVersion => "no_current_version",
            Self::Busy => "busy",
            Self::UnsupportedImageType(_) => "unsupported_image_type",
            Self::StaleResult => "stale_result",
            Self::Storage(_) => "storage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EditorError;

    #[test]
    fn gateway_errors_get_failure_prefix() {
        assert_eq!(
            EditorError::ContentBlocked.user_message(),
            concat!(
                "Failed to generate image: ",
                "The request was blocked due to safety settings. Please modify your prompt."
            )
        );
        assert_eq!(
            EditorError::GatewayFailure("Gemini request failed (400): bad key".to_string())
                .user_message(),
            "Failed to generate image: Gemini request failed (400): bad key"
        );
    }

    #[test]
    fn local_errors_render_verbatim() {
        assert_eq!(
            EditorError::MissingCredential.user_message(),
            "API key is missing."
        );
        assert_eq!(
            EditorError::IndexOutOfRange { index: 4, len: 2 }.user_message(),
            "index 4 is out of range for 2 item(s)"
        );
        assert_eq!(EditorError::Busy.kind(), "busy");
    }

    #[test]
    fn from_gateway_keeps_context_chain() {
        let err = anyhow::anyhow!("connection reset").context("Gemini request failed");
        assert_eq!(
            EditorError::from_gateway(&err),
            EditorError::GatewayFailure("Gemini request failed: connection reset".to_string())
        );
    }
}

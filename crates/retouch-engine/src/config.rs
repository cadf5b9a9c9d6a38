use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_GATEWAY: &str = "gemini";

const DEFAULT_TIMEOUT_S: f64 = 90.0;
const MIN_TIMEOUT_S: f64 = 15.0;
const MAX_TIMEOUT_S: f64 = 300.0;

#[derive(Debug, Clone, PartialEq)]
pub struct EditorConfig {
    pub api_base: String,
    pub model: String,
    pub request_timeout: Duration,
    pub gateway: String,
    pub state_dir: PathBuf,
}

impl EditorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_base = get("RETOUCH_GEMINI_API_BASE")
            .or_else(|| get("GEMINI_API_BASE"))
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let model = get("RETOUCH_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string());
        let timeout_s = get("RETOUCH_REQUEST_TIMEOUT")
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .unwrap_or(DEFAULT_TIMEOUT_S)
            .clamp(MIN_TIMEOUT_S, MAX_TIMEOUT_S);
        let gateway = get("RETOUCH_GATEWAY")
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_GATEWAY.to_string());
        let state_dir = get("RETOUCH_HOME")
            .map(PathBuf::from)
            .or_else(|| get("HOME").map(|home| PathBuf::from(home).join(".retouch")))
            .unwrap_or_else(|| PathBuf::from(".retouch"));

        Self {
            api_base,
            model,
            request_timeout: Duration::from_secs_f64(timeout_s),
            gateway,
            state_dir,
        }
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.state_dir.join("credentials.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.state_dir.join("events.jsonl")
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

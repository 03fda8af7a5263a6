use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Successful transcription payload returned by `POST /asr` and
/// `POST /transcribe/`. `duration` is the audio length in seconds,
/// formatted with one decimal place (e.g. "3.1").
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TranscribeResponse {
    pub transcription: String,
    pub duration: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// What a transcription endpoint response body deserializes into:
/// either a success payload or an `{"error": ...}` payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ApiOutcome {
    Ok(TranscribeResponse),
    Err(ErrorResponse),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
}

pub const STATUS_HEALTHY: &str = "healthy";
pub const STATUS_MODEL_NOT_LOADED: &str = "model_not_loaded";

impl HealthResponse {
    pub fn healthy(model: impl Into<String>) -> Self {
        Self {
            status: STATUS_HEALTHY.to_string(),
            model: model.into(),
        }
    }

    pub fn model_not_loaded(model: impl Into<String>) -> Self {
        Self {
            status: STATUS_MODEL_NOT_LOADED.to_string(),
            model: model.into(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == STATUS_HEALTHY
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PingResponse {
    pub response: String,
}

impl PingResponse {
    pub fn pong() -> Self {
        Self {
            response: "pong".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused: is parrotd running?")]
    ConnectionRefused,

    #[error("Request timeout")]
    Timeout,

    #[error("API returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Request failed: {0}")]
    Request(String),
}

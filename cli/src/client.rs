use shared::{ApiError, ApiOutcome, HealthResponse};
use std::path::Path;
use std::time::Duration;

/// Timeout for transcription requests (matches the server-side worst case
/// for long clips on CPU).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the lightweight health probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the parrotd transcription API.
pub struct AsrClient {
    base_url: String,
    http: reqwest::Client,
}

impl AsrClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Request(e.to_string()))?;

        Ok(Self { base_url, http })
    }

    /// Probe `GET /health`. Ok means the daemon answered; the payload says
    /// whether the model is loaded yet.
    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<HealthResponse>()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))
    }

    /// Post one audio file to `POST /asr` and parse the JSON payload,
    /// whichever of the two contract shapes it takes.
    pub async fn transcribe_file(&self, path: &Path) -> Result<ApiOutcome, ApiError> {
        let bytes = tokio::fs::read(path).await?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio")
            .to_string();
        let mime = mime_for_filename(&filename);

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime)
            .map_err(|e| ApiError::Request(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/asr", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ApiOutcome>()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else if e.is_connect() {
        ApiError::ConnectionRefused
    } else {
        ApiError::Request(e.to_string())
    }
}

/// The daemon sniffs the container from the bytes; the MIME type is a hint.
fn mime_for_filename(filename: &str) -> &'static str {
    match Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    }
}

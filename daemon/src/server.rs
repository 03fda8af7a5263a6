use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use shared::{ErrorResponse, HealthResponse, PingResponse, TranscribeResponse};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::audio;
use crate::state::AppState;

type ApiFailure = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiFailure {
    (status, Json(ErrorResponse::new(message)))
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    let max_upload = state.config.server.max_upload_bytes;

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ping", get(ping_handler))
        .route("/asr", post(transcribe_handler))
        .route("/transcribe/", post(transcribe_handler))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// GET /
async fn index_handler() -> Json<Value> {
    Json(json!({
        "message": "parrotd transcription API is running!",
        "endpoints": {
            "transcribe": "POST /asr (multipart field 'file') or POST /transcribe/ (field 'audio_file')",
            "health": "GET /health",
            "ping": "GET /ping"
        },
        "usage": "curl -F 'file=@clip.mp3' http://localhost:8001/asr"
    }))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.health().await)
}

/// GET /ping
async fn ping_handler() -> Json<PingResponse> {
    Json(PingResponse::pong())
}

/// POST /asr and POST /transcribe/
async fn transcribe_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<TranscribeResponse>, ApiFailure> {
    if !state.limiter.check() {
        return Err(api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests",
        ));
    }

    let (filename, bytes) = read_audio_field(multipart).await?;

    let mut engine = state.engine.lock().await;

    if !engine.is_loaded() {
        info!("Model not loaded yet, loading on first request...");
        if let Err(e) = engine.load().await {
            error!("Error loading model: {}", e);
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load model",
            ));
        }
    }

    let decoded = audio::decode_upload(bytes, filename.as_deref()).map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error processing audio: {}", e),
        )
    })?;
    let duration = decoded.duration_string();

    let transcription = engine.transcribe(&decoded.samples).await.map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error processing audio: {}", e),
        )
    })?;

    info!(
        "Transcribed {}s upload: '{}'",
        duration,
        transcription
    );

    Ok(Json(TranscribeResponse {
        transcription,
        duration,
    }))
}

/// Pull the uploaded audio out of the multipart form. Both the `file`
/// field (the /asr contract) and `audio_file` (the /transcribe/ contract)
/// are accepted.
async fn read_audio_field(
    mut multipart: Multipart,
) -> Result<(Option<String>, Vec<u8>), ApiFailure> {
    loop {
        let field = multipart.next_field().await.map_err(|e| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("Malformed multipart request: {}", e),
            )
        })?;

        let Some(field) = field else {
            return Err(api_error(StatusCode::BAD_REQUEST, "No file provided"));
        };

        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("file") | Some("audio_file") => {
                let filename = field.file_name().map(|s| s.to_string());
                if filename.as_deref() == Some("") {
                    return Err(api_error(StatusCode::BAD_REQUEST, "No file selected"));
                }

                let bytes = field.bytes().await.map_err(|e| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read upload: {}", e),
                    )
                })?;

                return Ok((filename, bytes.to_vec()));
            }
            _ => continue,
        }
    }
}

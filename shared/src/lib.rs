pub mod api;

pub use api::{
    ApiError, ApiOutcome, ErrorResponse, HealthResponse, PingResponse, TranscribeResponse,
};

pub mod audio;
pub mod config;
pub mod fetch;
pub mod rate_limit;
pub mod server;
pub mod state;
pub mod transcription;

pub use rate_limit::RequestRateLimiter;
pub use state::AppState;
pub use transcription::{SpeechEngine, Wav2VecEngine, WhisperEngine};

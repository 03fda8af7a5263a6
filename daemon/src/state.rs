use crate::config::Config;
use crate::rate_limit::RequestRateLimiter;
use crate::transcription::SpeechEngine;
use shared::HealthResponse;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared state accessible from the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<Mutex<Box<dyn SpeechEngine>>>,
    pub limiter: Arc<RequestRateLimiter>,
}

impl AppState {
    pub fn new(config: Config, engine: Box<dyn SpeechEngine>) -> Self {
        let limiter = RequestRateLimiter::from_config(&config.rate_limit);
        Self {
            config: Arc::new(config),
            engine: Arc::new(Mutex::new(engine)),
            limiter: Arc::new(limiter),
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let engine = self.engine.lock().await;
        if engine.is_loaded() {
            HealthResponse::healthy(engine.model_name())
        } else {
            HealthResponse::model_not_loaded(engine.model_name())
        }
    }
}

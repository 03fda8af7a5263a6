use anyhow::Result;
use parrotd::config::load_config;
use parrotd::server;
use parrotd::state::AppState;
use parrotd::transcription::build_engine;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    info!("parrot transcription daemon (parrotd) starting...");

    let config = load_config()?;
    let engine = build_engine(&config)?;
    info!(
        "Serving engine '{}' with model {}",
        config.engine.backend,
        engine.model_name()
    );

    let state = AppState::new(config, engine);
    server::serve(state).await?;

    Ok(())
}

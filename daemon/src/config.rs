use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default = "Config::default")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub whisper: WhisperConfig,
    #[serde(default)]
    pub wav2vec2: Wav2VecConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8001
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    /// Which speech engine backs the transcription endpoints:
    /// "whisper" (pretrained pipeline) or "wav2vec2" (CTC acoustic model).
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

fn default_backend() -> String {
    "wav2vec2".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WhisperConfig {
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default = "default_whisper_model_url")]
    pub model_url: String,
    #[serde(default)]
    pub model_checksum: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_whisper_backend")]
    pub backend: String,
    #[serde(default = "default_sampling_strategy")]
    pub sampling_strategy: String,
    #[serde(default = "default_min_audio_samples")]
    pub min_audio_samples: usize,
}

fn default_whisper_backend() -> String {
    "cpu".to_string()
}

fn default_whisper_model_url() -> String {
    "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.bin".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_sampling_strategy() -> String {
    "greedy".to_string()
}

fn default_min_audio_samples() -> usize {
    18000
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            model_url: default_whisper_model_url(),
            model_checksum: None,
            language: default_language(),
            backend: default_whisper_backend(),
            sampling_strategy: default_sampling_strategy(),
            min_audio_samples: default_min_audio_samples(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Wav2VecConfig {
    #[serde(default)]
    pub model_dir: Option<String>,
    #[serde(default = "default_wav2vec_model_url")]
    pub model_url: String,
    #[serde(default = "default_wav2vec_vocab_url")]
    pub vocab_url: String,
    #[serde(default)]
    pub model_checksum: Option<String>,
    #[serde(default)]
    pub vocab_checksum: Option<String>,
}

fn default_wav2vec_model_url() -> String {
    "https://huggingface.co/onnx-community/wav2vec2-base-960h-ONNX/resolve/main/onnx/model.onnx"
        .to_string()
}

fn default_wav2vec_vocab_url() -> String {
    "https://huggingface.co/facebook/wav2vec2-base-960h/resolve/main/vocab.json".to_string()
}

impl Default for Wav2VecConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            model_url: default_wav2vec_model_url(),
            vocab_url: default_wav2vec_vocab_url(),
            model_checksum: None,
            vocab_checksum: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_capacity: default_burst_capacity(),
            enabled: default_rate_limit_enabled(),
        }
    }
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_burst_capacity() -> u32 {
    20
}

fn default_rate_limit_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            engine: EngineConfig::default(),
            whisper: WhisperConfig::default(),
            wav2vec2: Wav2VecConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

pub fn load_config() -> Result<Config> {
    let config_path = get_config_path();

    if !config_path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", config_path);
        return Ok(Config::default());
    }

    load_config_from(&config_path)
}

pub fn load_config_from(config_path: &std::path::Path) -> Result<Config> {
    tracing::info!("Loading config from {:?}", config_path);
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;

    tracing::info!("Config loaded successfully");
    Ok(config)
}

fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .expect("Failed to get config directory")
        .join("parrot")
        .join("parrotd.toml")
}

use crate::config::WhisperConfig;
use crate::fetch;
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState,
};

use super::{post_process_transcription, SpeechEngine};

/// Speech engine backed by a pretrained whisper.cpp pipeline.
pub struct WhisperEngine {
    context: Option<WhisperContext>,
    state: Option<WhisperState>,
    model_loaded: bool,
    model_path: PathBuf,
    config: WhisperConfig,
}

impl WhisperEngine {
    pub fn new(config: WhisperConfig) -> Result<Self> {
        let model_path = find_model_path(&config)?;

        Ok(Self {
            context: None,
            state: None,
            model_loaded: false,
            model_path,
            config,
        })
    }

    fn build_context(&self) -> Result<WhisperContext> {
        let use_gpu = match self.config.backend.to_lowercase().as_str() {
            "gpu" | "cuda" => true,
            "cpu" => false,
            other => {
                warn!(
                    "Invalid backend value '{}', defaulting to CPU. Valid options: cpu, gpu, cuda",
                    other
                );
                false
            }
        };

        let model_path = self
            .model_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Model path is not valid UTF-8"))?;

        let mut params = WhisperContextParameters::default();
        params.use_gpu(use_gpu);

        if use_gpu {
            info!("Attempting to use GPU backend for Whisper");
            match WhisperContext::new_with_params(model_path, params) {
                Ok(ctx) => Ok(ctx),
                Err(e) => {
                    warn!("GPU initialization failed: {}. Falling back to CPU backend.", e);
                    let mut cpu_params = WhisperContextParameters::default();
                    cpu_params.use_gpu(false);
                    WhisperContext::new_with_params(model_path, cpu_params).map_err(|e| {
                        anyhow::anyhow!("Failed to load Whisper model (CPU fallback): {}", e)
                    })
                }
            }
        } else {
            info!("Using CPU backend for Whisper");
            WhisperContext::new_with_params(model_path, params)
                .map_err(|e| anyhow::anyhow!("Failed to load Whisper model: {}", e))
        }
    }

    fn parse_sampling_strategy(&self) -> SamplingStrategy {
        match self.config.sampling_strategy.to_lowercase().as_str() {
            "greedy" => SamplingStrategy::Greedy { best_of: 1 },
            "beam" => SamplingStrategy::BeamSearch {
                beam_size: 5,
                patience: 1.0,
            },
            other => {
                warn!("Unknown sampling strategy '{}', defaulting to greedy", other);
                SamplingStrategy::Greedy { best_of: 1 }
            }
        }
    }
}

#[async_trait]
impl SpeechEngine for WhisperEngine {
    fn model_name(&self) -> String {
        self.model_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("whisper")
            .to_string()
    }

    fn is_loaded(&self) -> bool {
        self.model_loaded
    }

    async fn load(&mut self) -> Result<()> {
        info!("Loading Whisper model from: {:?}", self.model_path);

        fetch::ensure_artifact(
            &self.config.model_url,
            &self.model_path,
            self.config.model_checksum.as_deref(),
        )
        .await?;

        let ctx = self.build_context()?;
        let state = ctx
            .create_state()
            .map_err(|e| anyhow::anyhow!("Failed to create Whisper state: {}", e))?;

        self.context = Some(ctx);
        self.state = Some(state);
        self.model_loaded = true;

        info!("Whisper model and state loaded successfully");
        Ok(())
    }

    async fn transcribe(&mut self, samples: &[f32]) -> Result<String> {
        if !self.model_loaded {
            return Err(anyhow::anyhow!("Model not loaded"));
        }

        debug!(
            "Transcribing {} audio samples with language: {}",
            samples.len(),
            self.config.language
        );

        let audio = pad_audio(samples, self.config.min_audio_samples);
        let sampling_strategy = self.parse_sampling_strategy();

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("WhisperState not initialized"))?;

        let mut params = FullParams::new(sampling_strategy);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(Some(&self.config.language));

        debug!("Running Whisper transcription...");
        state
            .full(params, &audio)
            .map_err(|e| anyhow::anyhow!("Transcription failed: {}", e))?;

        let num_segments = state.full_n_segments();
        debug!("Extracting {} text segments...", num_segments);

        let mut transcription = String::new();
        for i in 0..num_segments {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(text) = segment.to_str() {
                    transcription.push_str(text);
                    transcription.push(' ');
                }
            }
        }

        Ok(post_process_transcription(&transcription))
    }
}

/// Whisper degrades on very short clips; pad with trailing silence
/// up to `min_samples`.
fn pad_audio(audio: &[f32], min_samples: usize) -> Vec<f32> {
    if audio.len() >= min_samples {
        return audio.to_vec();
    }

    let padding_len = min_samples - audio.len();
    debug!(
        "Padding audio: {} samples + {} samples of silence",
        audio.len(),
        padding_len
    );

    let mut padded = audio.to_vec();
    padded.extend(std::iter::repeat(0.0).take(padding_len));
    padded
}

fn find_model_path(config: &WhisperConfig) -> Result<PathBuf> {
    if let Some(ref overridden) = config.model_path {
        return Ok(PathBuf::from(overridden));
    }

    let model_filename = fetch::artifact_filename(&config.model_url)?;
    let default_dir = fetch::default_model_dir()?;

    let candidates = [
        default_dir.join(&model_filename),
        PathBuf::from("/usr/share/whisper/").join(&model_filename),
        PathBuf::from("./models/").join(&model_filename),
        PathBuf::from(&model_filename),
    ];

    for path in &candidates {
        if path.exists() {
            info!("Found model at: {:?}", path);
            return Ok(path.clone());
        }
    }

    let default_path = default_dir.join(&model_filename);
    warn!("Model not found, will use default path: {:?}", default_path);
    Ok(default_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_audio_short_clip() {
        let padded = pad_audio(&[0.5; 100], 18000);
        assert_eq!(padded.len(), 18000);
        assert_eq!(padded[99], 0.5);
        assert_eq!(padded[100], 0.0);
    }

    #[test]
    fn test_pad_audio_long_clip_unchanged() {
        let audio = vec![0.1; 20000];
        assert_eq!(pad_audio(&audio, 18000), audio);
    }

    #[test]
    fn test_model_path_override_wins() {
        let config = WhisperConfig {
            model_path: Some("/opt/models/custom.bin".to_string()),
            ..WhisperConfig::default()
        };
        let path = find_model_path(&config).unwrap();
        assert_eq!(path, PathBuf::from("/opt/models/custom.bin"));
    }

    #[test]
    fn test_model_path_derived_from_url() {
        let path = find_model_path(&WhisperConfig::default()).unwrap();
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("ggml-base.bin")
        );
    }

    #[test]
    fn test_model_name_is_model_filename() {
        let engine = WhisperEngine::new(WhisperConfig::default()).unwrap();
        assert_eq!(engine.model_name(), "ggml-base.bin");
        assert!(!engine.is_loaded());
    }

    #[tokio::test]
    async fn test_transcribe_without_load_is_error() {
        let mut engine = WhisperEngine::new(WhisperConfig::default()).unwrap();
        let err = engine.transcribe(&[0.0; 16000]).await.unwrap_err();
        assert_eq!(err.to_string(), "Model not loaded");
    }

    #[test]
    fn test_parse_sampling_strategy_variants() {
        let mut config = WhisperConfig::default();

        config.sampling_strategy = "beam".to_string();
        let engine = WhisperEngine::new(config.clone()).unwrap();
        assert!(matches!(
            engine.parse_sampling_strategy(),
            SamplingStrategy::BeamSearch { .. }
        ));

        config.sampling_strategy = "mystery".to_string();
        let engine = WhisperEngine::new(config).unwrap();
        assert!(matches!(
            engine.parse_sampling_strategy(),
            SamplingStrategy::Greedy { best_of: 1 }
        ));
    }
}

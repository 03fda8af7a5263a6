pub mod wav2vec;
pub mod whisper;

pub use wav2vec::Wav2VecEngine;
pub use whisper::WhisperEngine;

use crate::config::Config;
use anyhow::Result;
use async_trait::async_trait;

/// A speech-to-text backend serving the transcription endpoints.
///
/// Engines load their model lazily: the first request triggers `load`,
/// and a failed load leaves the daemon running and reporting
/// `model_not_loaded` from the health endpoint.
#[async_trait]
pub trait SpeechEngine: Send {
    /// Model label reported by the health endpoint.
    fn model_name(&self) -> String;

    fn is_loaded(&self) -> bool;

    async fn load(&mut self) -> Result<()>;

    async fn transcribe(&mut self, samples: &[f32]) -> Result<String>;
}

/// Build the engine named by `[engine] backend`.
pub fn build_engine(config: &Config) -> Result<Box<dyn SpeechEngine>> {
    match config.engine.backend.to_lowercase().as_str() {
        "whisper" => Ok(Box::new(WhisperEngine::new(config.whisper.clone())?)),
        "wav2vec2" => Ok(Box::new(Wav2VecEngine::new(config.wav2vec2.clone())?)),
        other => {
            tracing::warn!(
                "Unknown engine backend '{}', defaulting to wav2vec2. Valid options: whisper, wav2vec2",
                other
            );
            Ok(Box::new(Wav2VecEngine::new(config.wav2vec2.clone())?))
        }
    }
}

pub fn post_process_transcription(text: &str) -> String {
    let mut text = text.trim().to_string();

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut deduped_words = Vec::new();
    for word in words {
        if !deduped_words.last().map_or(false, |last| *last == word) {
            deduped_words.push(word);
        }
    }
    text = deduped_words.join(" ");

    let re = regex::Regex::new(r"\[.*?\]|\{.*?\}|\(.*?\)").unwrap();
    text = re.replace_all(&text, "").to_string();
    text = text.replace("  ", " ");
    text = text.trim().to_string();

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_process_strips_whisper_tags() {
        assert_eq!(post_process_transcription("[BLANK_AUDIO] hello there"), "hello there");
        assert_eq!(post_process_transcription("(music) testing"), "testing");
    }

    #[test]
    fn test_post_process_collapses_repeated_words() {
        assert_eq!(
            post_process_transcription("the the quick brown fox"),
            "the quick brown fox"
        );
    }

    #[test]
    fn test_post_process_trims_and_normalizes_spaces() {
        assert_eq!(post_process_transcription("  hello   world  "), "hello world");
    }

    #[test]
    fn test_post_process_plain_text_unchanged() {
        assert_eq!(
            post_process_transcription("HE TOLD US A VERY EXCITING TALE"),
            "HE TOLD US A VERY EXCITING TALE"
        );
    }

    #[test]
    fn test_build_engine_selects_whisper() {
        let mut config = Config::default();
        config.engine.backend = "whisper".to_string();
        let engine = build_engine(&config).unwrap();
        assert!(engine.model_name().contains("ggml"));
    }

    #[test]
    fn test_build_engine_selects_wav2vec() {
        let config = Config::default();
        let engine = build_engine(&config).unwrap();
        assert!(engine.model_name().contains("wav2vec2"));
    }

    #[test]
    fn test_build_engine_unknown_backend_falls_back() {
        let mut config = Config::default();
        config.engine.backend = "bogus".to_string();
        let engine = build_engine(&config).unwrap();
        assert!(engine.model_name().contains("wav2vec2"));
    }
}

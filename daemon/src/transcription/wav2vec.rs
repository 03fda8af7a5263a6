use crate::config::Wav2VecConfig;
use crate::fetch;
use anyhow::Result;
use async_trait::async_trait;
use ndarray::prelude::*;
use ort::{inputs, session::Session, value::Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::SpeechEngine;

/// Speech engine running a wav2vec2 CTC acoustic model through ONNX Runtime.
///
/// Unlike the whisper pipeline, nothing is delegated: feature extraction is
/// zero-mean/unit-variance normalization of the raw waveform, and decoding is
/// per-frame argmax over the logits followed by CTC collapse and a character
/// vocabulary lookup.
pub struct Wav2VecEngine {
    session: Option<Session>,
    vocab: Option<Vocabulary>,
    model_path: PathBuf,
    vocab_path: PathBuf,
    config: Wav2VecConfig,
}

impl Wav2VecEngine {
    pub fn new(config: Wav2VecConfig) -> Result<Self> {
        let model_dir = match config.model_dir {
            Some(ref dir) => PathBuf::from(dir),
            None => fetch::default_model_dir()?,
        };

        let model_path = model_dir.join(fetch::artifact_filename(&config.model_url)?);
        let vocab_path = model_dir.join(fetch::artifact_filename(&config.vocab_url)?);

        Ok(Self {
            session: None,
            vocab: None,
            model_path,
            vocab_path,
            config,
        })
    }
}

#[async_trait]
impl SpeechEngine for Wav2VecEngine {
    fn model_name(&self) -> String {
        repo_label(&self.config.model_url)
    }

    fn is_loaded(&self) -> bool {
        self.session.is_some() && self.vocab.is_some()
    }

    async fn load(&mut self) -> Result<()> {
        info!("Loading wav2vec2 model from: {:?}", self.model_path);

        fetch::ensure_artifact(
            &self.config.model_url,
            &self.model_path,
            self.config.model_checksum.as_deref(),
        )
        .await?;
        fetch::ensure_artifact(
            &self.config.vocab_url,
            &self.vocab_path,
            self.config.vocab_checksum.as_deref(),
        )
        .await?;

        let session = Session::builder()?.commit_from_file(&self.model_path)?;
        let vocab = Vocabulary::from_file(&self.vocab_path)?;

        info!(
            "wav2vec2 model loaded ({} vocabulary entries)",
            vocab.len()
        );

        self.session = Some(session);
        self.vocab = Some(vocab);
        Ok(())
    }

    async fn transcribe(&mut self, samples: &[f32]) -> Result<String> {
        if !self.is_loaded() {
            return Err(anyhow::anyhow!("Model not loaded"));
        }

        debug!("Transcribing {} audio samples with wav2vec2", samples.len());

        let input = normalize_waveform(samples);
        let input = Array2::from_shape_vec((1, input.len()), input)?;
        let input_value = Value::from_array(input)?;

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("ONNX session not initialized"))?;

        let mut outputs = session.run(inputs!("input_values" => input_value))?;

        let logits_value = outputs
            .remove("logits")
            .ok_or_else(|| anyhow::anyhow!("Model output 'logits' missing"))?;

        let logits: ArrayViewD<f32> = logits_value.try_extract_array()?;
        let logits = logits.to_owned().into_dimensionality::<Ix3>()?;
        let logits = logits.index_axis_move(Axis(0), 0);

        let vocab = self
            .vocab
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Vocabulary not initialized"))?;

        let ids = greedy_ids(&logits);
        let collapsed = ctc_collapse(&ids, vocab.blank_id);

        Ok(vocab.decode(&collapsed))
    }
}

/// wav2vec2's feature extraction: scale the waveform to zero mean and
/// unit variance.
fn normalize_waveform(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    let variance =
        samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>() / samples.len() as f32;
    let denom = (variance + 1e-7).sqrt();

    samples.iter().map(|s| (s - mean) / denom).collect()
}

/// Per-frame argmax over `[T, V]` logits.
fn greedy_ids(logits: &Array2<f32>) -> Vec<u32> {
    let mut ids = Vec::with_capacity(logits.shape()[0]);
    for row in logits.rows() {
        let max_idx = row
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        ids.push(max_idx as u32);
    }
    ids
}

/// CTC collapse: drop adjacent repeats, then drop blanks.
fn ctc_collapse(ids: &[u32], blank_id: u32) -> Vec<u32> {
    let mut result = Vec::new();
    let mut prev: Option<u32> = None;

    for &id in ids {
        if id == blank_id {
            prev = Some(id);
            continue;
        }
        if Some(id) != prev {
            result.push(id);
        }
        prev = Some(id);
    }

    result
}

fn repo_label(url: &str) -> String {
    // huggingface.co/{org}/{repo}/resolve/... -> "org/repo"
    if let Some(path) = url
        .strip_prefix("https://huggingface.co/")
        .or_else(|| url.strip_prefix("http://huggingface.co/"))
    {
        let mut segments = path.split('/');
        if let (Some(org), Some(repo)) = (segments.next(), segments.next()) {
            return format!("{}/{}", org, repo);
        }
    }

    Path::new(url)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("wav2vec2")
        .to_string()
}

/// Character vocabulary loaded from a wav2vec2 `vocab.json` token→id map.
pub struct Vocabulary {
    id_to_token: Vec<String>,
    pub blank_id: u32,
}

impl Vocabulary {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read vocab file {:?}: {}", path, e))?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let map: HashMap<String, u32> = serde_json::from_str(json)
            .map_err(|e| anyhow::anyhow!("Invalid vocab JSON: {}", e))?;

        let max_id = map
            .values()
            .max()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Vocabulary is empty"))?;

        let mut id_to_token = vec![String::new(); max_id as usize + 1];
        let mut blank_id = 0;

        for (token, id) in map {
            if token == "<pad>" {
                blank_id = id;
            }
            id_to_token[id as usize] = token;
        }

        Ok(Self {
            id_to_token,
            blank_id,
        })
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    /// Map collapsed token ids to text. `|` is the word delimiter; special
    /// tokens are dropped.
    pub fn decode(&self, ids: &[u32]) -> String {
        let mut text = String::new();
        for &id in ids {
            match self.id_to_token.get(id as usize).map(|s| s.as_str()) {
                Some("|") => text.push(' '),
                Some(token) if token.starts_with('<') && token.ends_with('>') => {}
                Some(token) => text.push_str(token),
                None => {}
            }
        }
        text.trim().to_string()
    }
}

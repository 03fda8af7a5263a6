use anyhow::Result;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Sample rate every speech engine expects.
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Decoded upload, ready for an engine.
pub struct DecodedAudio {
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    /// Audio length in seconds at the target sample rate.
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / TARGET_SAMPLE_RATE as f32
    }

    /// Duration formatted the way the API reports it ("3.1").
    pub fn duration_string(&self) -> String {
        format!("{:.1}", self.duration_secs())
    }
}

/// Decode an uploaded audio blob (WAV, MP3, FLAC, OGG) into 16kHz mono f32.
///
/// The filename, when present, only seeds the container probe hint; the
/// probe falls back to content sniffing without it.
pub fn decode_upload(bytes: Vec<u8>, filename: Option<&str>) -> Result<DecodedAudio> {
    if bytes.is_empty() {
        return Err(anyhow::anyhow!("Empty audio payload"));
    }

    let cursor = std::io::Cursor::new(bytes);
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
    {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| anyhow::anyhow!("Unrecognized audio format: {}", e))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow::anyhow!("No decodable audio track found"))?;
    let track_id = track.id;

    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1)
        .max(1);
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow::anyhow!("Audio track does not declare a sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow::anyhow!("Failed to create decoder: {}", e))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(anyhow::anyhow!("Error reading audio packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let buf = sample_buf.get_or_insert_with(|| {
                    SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
                });
                buf.copy_interleaved_ref(decoded);

                if channels == 1 {
                    samples.extend_from_slice(buf.samples());
                } else {
                    // Downmix by averaging interleaved frames
                    for frame in buf.samples().chunks_exact(channels) {
                        samples.push(frame.iter().sum::<f32>() / channels as f32);
                    }
                }
            }
            // A corrupt packet is skippable; the stream may still recover
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(anyhow::anyhow!("Audio decode failed: {}", e)),
        }
    }

    if samples.is_empty() {
        return Err(anyhow::anyhow!("Audio stream contained no samples"));
    }

    let samples = if sample_rate == TARGET_SAMPLE_RATE {
        samples
    } else {
        debug!(
            "Resampling {} samples from {} Hz to {} Hz",
            samples.len(),
            sample_rate,
            TARGET_SAMPLE_RATE
        );
        resample(samples, sample_rate, TARGET_SAMPLE_RATE)?
    };

    Ok(DecodedAudio { samples })
}

fn resample(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
        WindowFunction,
    };

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        2.0,
        params,
        samples.len(),
        1,
    )
    .map_err(|e| anyhow::anyhow!("Failed to create resampler: {}", e))?;

    let mut output = resampler
        .process(&[samples], None)
        .map_err(|e| anyhow::anyhow!("Resampling failed: {}", e))?;

    Ok(output.remove(0))
}

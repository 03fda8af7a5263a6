use crate::client::AsrClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use csv::StringRecord;
use governor::{Quota, RateLimiter};
use shared::{ApiError, ApiOutcome};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Header names probed, in priority order, for the column holding each
/// row's audio filename.
pub const FILENAME_COLUMNS: [&str; 5] = ["path", "filename", "file", "audio_file", "mp3_path"];

/// Columns appended to the manifest in the results CSV.
pub const RESULT_COLUMNS: [&str; 3] = ["generated_text", "api_duration", "api_error"];

/// Rows between checkpoint writes of the results CSV.
const CHECKPOINT_EVERY: usize = 100;

/// The transcription boundary, seamed out so batch processing is testable
/// without a live daemon.
#[async_trait]
pub trait Transcriber {
    async fn transcribe_file(&self, path: &Path) -> Result<ApiOutcome, ApiError>;
}

#[async_trait]
impl Transcriber for AsrClient {
    async fn transcribe_file(&self, path: &Path) -> Result<ApiOutcome, ApiError> {
        AsrClient::transcribe_file(self, path).await
    }
}

pub struct BatchOptions {
    pub manifest: PathBuf,
    /// Directory holding the audio clips; defaults to
    /// `<manifest_dir>/<manifest_stem>`.
    pub audio_dir: Option<PathBuf>,
    /// Results CSV path; defaults to
    /// `<manifest_dir>/<manifest_stem>-with-transcriptions.csv`.
    pub output: Option<PathBuf>,
    /// Stop after this many rows (smoke runs).
    pub limit: Option<usize>,
    /// Pacing between requests; 0 disables pacing.
    pub requests_per_second: u32,
}

impl BatchOptions {
    pub fn new(manifest: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            audio_dir: None,
            output: None,
            limit: None,
            requests_per_second: 10,
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub errors: usize,
    pub output_path: PathBuf,
}

/// Iterate the manifest, transcribe each row's audio file, and write the
/// results CSV. Per-row failures are recorded in the `api_error` column
/// and never abort the run.
pub async fn process_manifest(
    client: &impl Transcriber,
    opts: &BatchOptions,
) -> Result<BatchReport> {
    let manifest_dir = opts
        .manifest
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let manifest_stem = opts
        .manifest
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Manifest has no usable file name: {:?}", opts.manifest))?
        .to_string();

    let mut reader = csv::Reader::from_path(&opts.manifest)
        .with_context(|| format!("Failed to open manifest {:?}", opts.manifest))?;

    let headers = reader.headers()?.clone();
    let filename_column = find_filename_column(&headers)?;

    let records: Vec<StringRecord> = reader
        .records()
        .collect::<Result<_, _>>()
        .context("Failed to read manifest rows")?;
    info!("Loaded {} records from {:?}", records.len(), opts.manifest);

    let audio_dir = opts
        .audio_dir
        .clone()
        .unwrap_or_else(|| manifest_dir.join(&manifest_stem));
    if !audio_dir.exists() {
        return Err(anyhow::anyhow!(
            "Audio folder not found at {:?}",
            audio_dir
        ));
    }

    let output_path = opts.output.clone().unwrap_or_else(|| {
        manifest_dir.join(format!("{}-with-transcriptions.csv", manifest_stem))
    });

    // Every row pre-extended with empty result cells, so checkpoints always
    // write a full-width CSV
    let mut rows: Vec<Vec<String>> = records
        .iter()
        .map(|record| {
            let mut row: Vec<String> = record.iter().map(|s| s.to_string()).collect();
            row.extend(RESULT_COLUMNS.iter().map(|_| String::new()));
            row
        })
        .collect();

    let generated_idx = headers.len();
    let duration_idx = headers.len() + 1;
    let error_idx = headers.len() + 2;

    let limiter = NonZeroU32::new(opts.requests_per_second)
        .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

    let total = opts.limit.unwrap_or(rows.len()).min(rows.len());
    let mut processed = 0usize;
    let mut errors = 0usize;

    for index in 0..total {
        let filename = rows[index][filename_column].clone();
        let audio_path = audio_dir.join(&filename);

        if !audio_path.exists() {
            rows[index][error_idx] = format!("File not found: {}", audio_path.display());
            errors += 1;
        } else {
            if let Some(ref limiter) = limiter {
                limiter.until_ready().await;
            }

            match client.transcribe_file(&audio_path).await {
                Ok(ApiOutcome::Ok(resp)) => {
                    rows[index][generated_idx] = resp.transcription;
                    rows[index][duration_idx] = resp.duration;
                    processed += 1;
                }
                Ok(ApiOutcome::Err(resp)) => {
                    warn!("Row {} ({}): {}", index, filename, resp.error);
                    rows[index][error_idx] = resp.error;
                    errors += 1;
                }
                Err(e) => {
                    warn!("Row {} ({}): {}", index, filename, e);
                    rows[index][error_idx] = e.to_string();
                    errors += 1;
                }
            }
        }

        if (index + 1) % CHECKPOINT_EVERY == 0 {
            write_results(&output_path, &headers, &rows)?;
            info!(
                "Progress saved: {} processed, {} errors ({}/{} rows)",
                processed,
                errors,
                index + 1,
                total
            );
        }
    }

    write_results(&output_path, &headers, &rows)?;

    info!(
        "Processing complete: {} processed, {} errors, results in {:?}",
        processed, errors, output_path
    );

    Ok(BatchReport {
        total,
        processed,
        errors,
        output_path,
    })
}

fn find_filename_column(headers: &StringRecord) -> Result<usize> {
    for name in FILENAME_COLUMNS {
        if let Some(idx) = headers.iter().position(|h| h == name) {
            return Ok(idx);
        }
    }

    Err(anyhow::anyhow!(
        "Could not find filename column in manifest. Available columns: {:?}",
        headers.iter().collect::<Vec<_>>()
    ))
}

fn write_results(path: &Path, headers: &StringRecord, rows: &[Vec<String>]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to write {:?}", path))?;

    let mut full_headers: Vec<&str> = headers.iter().collect();
    full_headers.extend(RESULT_COLUMNS);
    writer.write_record(&full_headers)?;

    for row in rows {
        writer.write_record(row)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ErrorResponse, TranscribeResponse};
    use std::collections::HashMap;

    struct StubTranscriber {
        outcomes: HashMap<String, ApiOutcome>,
    }

    impl StubTranscriber {
        fn new() -> Self {
            Self {
                outcomes: HashMap::new(),
            }
        }

        fn ok(mut self, filename: &str, text: &str, duration: &str) -> Self {
            self.outcomes.insert(
                filename.to_string(),
                ApiOutcome::Ok(TranscribeResponse {
                    transcription: text.to_string(),
                    duration: duration.to_string(),
                }),
            );
            self
        }

        fn err(mut self, filename: &str, error: &str) -> Self {
            self.outcomes.insert(
                filename.to_string(),
                ApiOutcome::Err(ErrorResponse::new(error)),
            );
            self
        }
    }

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe_file(&self, path: &Path) -> Result<ApiOutcome, ApiError> {
            let name = path.file_name().unwrap().to_str().unwrap();
            self.outcomes
                .get(name)
                .cloned()
                .ok_or_else(|| ApiError::Request(format!("no stub for {}", name)))
        }
    }

    /// Lay out a manifest plus audio dir the way the extracted dataset
    /// looks on disk.
    fn make_dataset(dir: &Path, column: &str, filenames: &[&str]) -> PathBuf {
        let manifest = dir.join("cv-valid-dev.csv");
        let audio_dir = dir.join("cv-valid-dev");
        std::fs::create_dir_all(&audio_dir).unwrap();

        let mut contents = format!("{},text\n", column);
        for name in filenames {
            contents.push_str(&format!("{},some reference text\n", name));
            std::fs::write(audio_dir.join(name), b"fake audio").unwrap();
        }
        std::fs::write(&manifest, contents).unwrap();
        manifest
    }

    fn read_rows(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
        let mut reader = csv::Reader::from_path(path).unwrap();
        let headers = reader.headers().unwrap().iter().map(String::from).collect();
        let rows = reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect();
        (headers, rows)
    }

    #[tokio::test]
    async fn test_batch_appends_result_columns() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = make_dataset(dir.path(), "filename", &["a.mp3", "b.mp3"]);

        let client = StubTranscriber::new()
            .ok("a.mp3", "HELLO", "1.1")
            .ok("b.mp3", "WORLD", "2.2");

        let mut opts = BatchOptions::new(&manifest);
        opts.requests_per_second = 0;
        let report = process_manifest(&client, &opts).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.errors, 0);

        let (headers, rows) = read_rows(&report.output_path);
        assert_eq!(
            headers,
            vec!["filename", "text", "generated_text", "api_duration", "api_error"]
        );
        assert_eq!(rows[0][2], "HELLO");
        assert_eq!(rows[0][3], "1.1");
        assert_eq!(rows[0][4], "");
        assert_eq!(rows[1][2], "WORLD");
    }

    #[tokio::test]
    async fn test_batch_records_api_errors_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = make_dataset(dir.path(), "filename", &["a.mp3", "b.mp3"]);

        let client = StubTranscriber::new()
            .err("a.mp3", "Error processing audio: bad mp3")
            .ok("b.mp3", "STILL RUNS", "0.9");

        let mut opts = BatchOptions::new(&manifest);
        opts.requests_per_second = 0;
        let report = process_manifest(&client, &opts).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.errors, 1);

        let (_, rows) = read_rows(&report.output_path);
        assert_eq!(rows[0][2], "");
        assert_eq!(rows[0][4], "Error processing audio: bad mp3");
        assert_eq!(rows[1][2], "STILL RUNS");
    }

    #[tokio::test]
    async fn test_batch_missing_audio_file_recorded_without_request() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = make_dataset(dir.path(), "filename", &["a.mp3"]);

        let mut contents = std::fs::read_to_string(&manifest).unwrap();
        contents.push_str("ghost.mp3,missing clip\n");
        std::fs::write(&manifest, contents).unwrap();

        // No stub for ghost.mp3: reaching the client would fail the test
        // with a stub error rather than a file-not-found row
        let client = StubTranscriber::new().ok("a.mp3", "OK", "1.0");

        let mut opts = BatchOptions::new(&manifest);
        opts.requests_per_second = 0;
        let report = process_manifest(&client, &opts).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.errors, 1);

        let (_, rows) = read_rows(&report.output_path);
        assert!(rows[1][4].starts_with("File not found:"));
    }

    #[tokio::test]
    async fn test_batch_respects_row_limit() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = make_dataset(dir.path(), "filename", &["a.mp3", "b.mp3", "c.mp3"]);

        let client = StubTranscriber::new().ok("a.mp3", "ONLY", "1.0");

        let mut opts = BatchOptions::new(&manifest);
        opts.requests_per_second = 0;
        opts.limit = Some(1);
        let report = process_manifest(&client, &opts).await.unwrap();

        assert_eq!(report.total, 1);
        assert_eq!(report.processed, 1);

        // Unprocessed rows still appear in the output, with empty results
        let (_, rows) = read_rows(&report.output_path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][2], "");
    }

    #[tokio::test]
    async fn test_batch_detects_path_column() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = make_dataset(dir.path(), "path", &["clip.mp3"]);

        let client = StubTranscriber::new().ok("clip.mp3", "VIA PATH", "0.4");

        let mut opts = BatchOptions::new(&manifest);
        opts.requests_per_second = 0;
        let report = process_manifest(&client, &opts).await.unwrap();
        assert_eq!(report.processed, 1);
    }

    #[tokio::test]
    async fn test_batch_rejects_manifest_without_filename_column() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("cv-valid-dev.csv");
        std::fs::create_dir_all(dir.path().join("cv-valid-dev")).unwrap();
        std::fs::write(&manifest, "speaker,text\nalice,hello\n").unwrap();

        let client = StubTranscriber::new();
        let mut opts = BatchOptions::new(&manifest);
        opts.requests_per_second = 0;

        let err = process_manifest(&client, &opts).await.unwrap_err();
        assert!(err.to_string().contains("filename column"));
        assert!(err.to_string().contains("speaker"));
    }

    #[tokio::test]
    async fn test_batch_custom_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = make_dataset(dir.path(), "filename", &["a.mp3"]);
        let output = dir.path().join("results.csv");

        let client = StubTranscriber::new().ok("a.mp3", "OK", "1.0");

        let mut opts = BatchOptions::new(&manifest);
        opts.requests_per_second = 0;
        opts.output = Some(output.clone());
        let report = process_manifest(&client, &opts).await.unwrap();

        assert_eq!(report.output_path, output);
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_default_output_name_follows_manifest_stem() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = make_dataset(dir.path(), "filename", &["a.mp3"]);

        let client = StubTranscriber::new().ok("a.mp3", "OK", "1.0");
        let mut opts = BatchOptions::new(&manifest);
        opts.requests_per_second = 0;

        let report = process_manifest(&client, &opts).await.unwrap();
        assert_eq!(
            report.output_path,
            dir.path().join("cv-valid-dev-with-transcriptions.csv")
        );
    }

    #[test]
    fn test_find_filename_column_priority_order() {
        let headers = StringRecord::from(vec!["text", "mp3_path", "path"]);
        // "path" wins over "mp3_path" because it is probed first
        assert_eq!(find_filename_column(&headers).unwrap(), 2);
    }
}

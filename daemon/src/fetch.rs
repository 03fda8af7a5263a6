use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

const MAX_RETRIES: usize = 3;

/// Make sure a model artifact exists at `dest`, downloading it if missing.
///
/// When a checksum is configured, an existing file is verified and
/// re-downloaded on mismatch; a fresh download that fails verification is
/// discarded and retried.
pub async fn ensure_artifact(url: &str, dest: &Path, checksum: Option<&str>) -> Result<()> {
    if dest.exists() {
        match checksum {
            None => return Ok(()),
            Some(expected) => {
                info!("Artifact exists at {:?}, verifying checksum...", dest);
                let actual = compute_file_checksum(dest)?;
                if actual == expected {
                    info!("Checksum verification passed: {}", actual);
                    return Ok(());
                }
                error!(
                    "Checksum mismatch for {:?}! Expected: {}, Got: {}",
                    dest, expected, actual
                );
                warn!("Re-downloading artifact due to checksum mismatch...");
            }
        }
    }

    download_artifact(url, dest, checksum).await
}

async fn download_artifact(url: &str, dest: &Path, checksum: Option<&str>) -> Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Invalid artifact path: {:?}", dest))?;

    info!("Creating artifact directory: {:?}", dir);
    tokio::fs::create_dir_all(dir).await?;

    info!("Downloading artifact from: {}", url);

    // Temporary file for atomic write
    let temp_path = PathBuf::from(format!("{}.tmp", dest.display()));

    if temp_path.exists() {
        warn!("Removing existing temporary file: {:?}", temp_path);
        tokio::fs::remove_file(&temp_path).await?;
    }

    let mut last_error = None;

    for attempt in 1..=MAX_RETRIES {
        debug!("Download attempt {}/{}", attempt, MAX_RETRIES);

        match fetch_to_temp(url, &temp_path, attempt, MAX_RETRIES).await {
            Ok(()) => {
                if let Some(expected) = checksum {
                    info!("Verifying artifact checksum...");
                    let actual = compute_file_checksum(&temp_path)?;
                    if actual != expected {
                        error!(
                            "Checksum verification failed! Expected: {}, Got: {}",
                            expected, actual
                        );
                        tokio::fs::remove_file(&temp_path).await?;
                        last_error = Some(anyhow::anyhow!(
                            "Checksum mismatch: expected {}, got {}",
                            expected,
                            actual
                        ));
                        continue;
                    }
                    info!("Checksum verification passed: {}", actual);
                }

                info!("Atomic rename: {:?} -> {:?}", temp_path, dest);
                tokio::fs::rename(&temp_path, dest).await?;
                info!("Artifact downloaded successfully to: {:?}", dest);
                return Ok(());
            }
            Err(e) => {
                error!("Download attempt {} failed: {}", attempt, e);
                last_error = Some(e);

                if temp_path.exists() {
                    warn!("Cleaning up partial download: {:?}", temp_path);
                    if let Err(cleanup_err) = tokio::fs::remove_file(&temp_path).await {
                        warn!("Failed to clean up temporary file: {}", cleanup_err);
                    }
                }

                if attempt < MAX_RETRIES {
                    let delay_ms = 1000 * 2_u64.pow(attempt as u32);
                    info!(
                        "Waiting {} ms before retry (attempt {}/{})...",
                        delay_ms,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow::anyhow!("Failed to download after {} attempts", MAX_RETRIES)))
}

async fn fetch_to_temp(
    url: &str,
    temp_path: &Path,
    attempt: usize,
    max_attempts: usize,
) -> Result<()> {
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    info!(
        "Starting download (attempt {}/{}): {}",
        attempt, max_attempts, url
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("GET request failed: {}", e))?;

    if !response.status().is_success() {
        return Err(anyhow::anyhow!("HTTP error: {}", response.status()));
    }

    let total_bytes = response.content_length();
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    let mut file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create temp file: {}", e))?;

    let start_time = std::time::Instant::now();
    let mut last_logged = 0u64;

    loop {
        // Bound each chunk read so a stalled server fails the attempt
        let chunk = match timeout(Duration::from_secs(30), stream.next()).await {
            Ok(Some(Ok(c))) => c,
            Ok(Some(Err(e))) => return Err(anyhow::anyhow!("Download error: {}", e)),
            Ok(None) => break,
            Err(_) => {
                return Err(anyhow::anyhow!(
                    "Download chunk read timeout: server did not send data within 30 seconds"
                ));
            }
        };

        downloaded += chunk.len() as u64;

        file.write_all(&chunk)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write to temp file: {}", e))?;

        // Log every ~32 MiB so big models report progress without flooding
        if downloaded - last_logged >= 32 * 1024 * 1024 {
            last_logged = downloaded;
            let elapsed = start_time.elapsed().as_secs();
            let speed = if elapsed > 0 { downloaded / elapsed } else { 0 };
            match total_bytes {
                Some(total) => info!(
                    "Download progress: {}% ({}/{}, {}/s)",
                    (downloaded * 100) / total,
                    pretty_bytes(downloaded),
                    pretty_bytes(total),
                    pretty_bytes(speed)
                ),
                None => info!(
                    "Download progress: {} downloaded ({}/s)",
                    pretty_bytes(downloaded),
                    pretty_bytes(speed)
                ),
            }
        }
    }

    file.flush()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to flush temp file: {}", e))?;

    info!(
        "Download finished: {} in {:?}",
        pretty_bytes(downloaded),
        start_time.elapsed()
    );

    Ok(())
}

pub fn compute_file_checksum(path: &Path) -> Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open {:?} for checksum: {}", path, e))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn pretty_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Derive the on-disk filename for an artifact URL.
pub fn artifact_filename(url: &str) -> Result<String> {
    let name = url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Invalid artifact URL: cannot extract filename"))?;
    Ok(name.to_string())
}

/// Default directory for downloaded model artifacts.
pub fn default_model_dir() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?
        .join("parrot")
        .join("models");
    Ok(dir)
}

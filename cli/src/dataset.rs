use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const MAX_RETRIES: usize = 3;

/// Download the dataset archive unless it is already on disk.
///
/// Streams to `<dest>.tmp` and renames into place so an interrupted
/// download never leaves a truncated archive behind.
pub async fn download_archive(url: &str, dest: &Path) -> Result<()> {
    if dest.exists() {
        info!("Dataset already downloaded at {:?}", dest);
        return Ok(());
    }

    if let Some(dir) = dest.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    info!("Downloading dataset archive from: {}", url);

    let temp_path = PathBuf::from(format!("{}.tmp", dest.display()));
    if temp_path.exists() {
        warn!("Removing existing temporary file: {:?}", temp_path);
        tokio::fs::remove_file(&temp_path).await?;
    }

    let mut last_error = None;

    for attempt in 1..=MAX_RETRIES {
        debug!("Download attempt {}/{}", attempt, MAX_RETRIES);

        match fetch_to_temp(url, &temp_path).await {
            Ok(downloaded) => {
                tokio::fs::rename(&temp_path, dest).await?;
                info!(
                    "Dataset downloaded successfully to {:?} ({} bytes)",
                    dest, downloaded
                );
                return Ok(());
            }
            Err(e) => {
                warn!("Download attempt {} failed: {}", attempt, e);
                last_error = Some(e);

                if temp_path.exists() {
                    let _ = tokio::fs::remove_file(&temp_path).await;
                }

                if attempt < MAX_RETRIES {
                    let delay_ms = 1000 * 2_u64.pow(attempt as u32);
                    info!("Waiting {} ms before retry...", delay_ms);
                    sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow::anyhow!("Failed to download after {} attempts", MAX_RETRIES)))
}

async fn fetch_to_temp(url: &str, temp_path: &Path) -> Result<u64> {
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()?;

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(anyhow::anyhow!("HTTP error: {}", response.status()));
    }

    let total_bytes = response.content_length();
    let mut downloaded = 0u64;
    let mut last_logged = 0u64;
    let mut stream = response.bytes_stream();

    let mut file = tokio::fs::File::create(temp_path).await?;

    loop {
        let chunk = match timeout(Duration::from_secs(30), stream.next()).await {
            Ok(Some(Ok(c))) => c,
            Ok(Some(Err(e))) => return Err(anyhow::anyhow!("Download error: {}", e)),
            Ok(None) => break,
            Err(_) => {
                return Err(anyhow::anyhow!(
                    "Download stalled: no data received within 30 seconds"
                ))
            }
        };

        downloaded += chunk.len() as u64;
        file.write_all(&chunk).await?;

        // Progress roughly every 50 MiB; the archive is on the order of GiB
        if downloaded - last_logged >= 50 * 1024 * 1024 {
            last_logged = downloaded;
            match total_bytes {
                Some(total) => info!(
                    "Download progress: {}% ({} / {} bytes)",
                    (downloaded * 100) / total,
                    downloaded,
                    total
                ),
                None => info!("Download progress: {} bytes", downloaded),
            }
        }
    }

    file.flush().await?;
    Ok(downloaded)
}

/// Unpack the dataset archive into `dest`.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    info!("Extracting {:?} to {:?}", archive_path, dest);

    let file = std::fs::File::open(archive_path)
        .with_context(|| format!("ZIP file not found at {:?}", archive_path))?;

    let mut archive =
        zip::ZipArchive::new(file).with_context(|| format!("Invalid archive {:?}", archive_path))?;

    std::fs::create_dir_all(dest)?;
    archive
        .extract(dest)
        .with_context(|| format!("Failed to extract {:?}", archive_path))?;

    info!("Extracted {} entries", archive.len());
    Ok(())
}

/// Find the manifest CSV below `root`.
///
/// The archive layout varies between dataset packagings, so probe the
/// well-known spots first and fall back to a recursive search.
pub fn locate_manifest(root: &Path, name: &str) -> Result<PathBuf> {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);

    let candidates = [
        root.join(name),
        root.join(stem).join(name),
        root.join("common_voice").join(name),
        root.join("common_voice").join(stem).join(name),
    ];

    for candidate in &candidates {
        if candidate.exists() {
            info!("Found manifest at: {:?}", candidate);
            return Ok(candidate.clone());
        }
    }

    debug!("Manifest not in candidate paths, searching {:?}...", root);
    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() && entry.file_name().to_str() == Some(name) {
            info!("Found manifest at: {:?}", entry.path());
            return Ok(entry.path().to_path_buf());
        }
    }

    Err(anyhow::anyhow!(
        "Could not find {} anywhere under {:?}",
        name,
        root
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_archive(dest: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(dest).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, contents) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_extract_archive_unpacks_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("dataset.zip");
        make_archive(
            &archive,
            &[("common_voice/cv-valid-dev.csv", "filename,text\na.mp3,hi\n")],
        );

        let out = dir.path().join("extracted");
        extract_archive(&archive, &out).unwrap();

        let csv = out.join("common_voice/cv-valid-dev.csv");
        assert!(csv.exists());
        assert!(std::fs::read_to_string(csv).unwrap().contains("a.mp3"));
    }

    #[test]
    fn test_extract_missing_archive_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_archive(&dir.path().join("nope.zip"), dir.path()).unwrap_err();
        assert!(err.to_string().contains("ZIP file not found"));
    }

    #[test]
    fn test_locate_manifest_candidate_path() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("common_voice");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("cv-valid-dev.csv"), "filename\n").unwrap();

        let found = locate_manifest(dir.path(), "cv-valid-dev.csv").unwrap();
        assert_eq!(found, nested.join("cv-valid-dev.csv"));
    }

    #[test]
    fn test_locate_manifest_recursive_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b/c");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(deep.join("cv-valid-dev.csv"), "filename\n").unwrap();

        let found = locate_manifest(dir.path(), "cv-valid-dev.csv").unwrap();
        assert_eq!(found, deep.join("cv-valid-dev.csv"));
    }

    #[test]
    fn test_locate_manifest_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(locate_manifest(dir.path(), "cv-valid-dev.csv").is_err());
    }

    #[tokio::test]
    async fn test_download_skips_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dataset.zip");
        std::fs::write(&dest, b"already here").unwrap();

        // URL is never touched when the archive exists
        download_archive("http://127.0.0.1:1/never", &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"already here");
    }
}

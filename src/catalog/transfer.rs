//! Shared HTTP plumbing for catalog clients: status mapping, streamed
//! downloads through `.part` files, and archive extraction.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::{RequestBuilder, Response};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::CatalogError;

/// Send `request` and turn any non-2xx status into a [`CatalogError`].
pub async fn send(request: RequestBuilder) -> Result<Response, CatalogError> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok());
    match CatalogError::from_status(status, response.url().as_str(), retry_after) {
        Some(err) => Err(err),
        None => Ok(response),
    }
}

/// Stream the response body of `request` into `destination`.
///
/// Bytes land in `<destination>.part` first; the rename happens only after
/// the whole body was written and flushed.
pub async fn download_to(request: RequestBuilder, destination: &Path) -> Result<u64, CatalogError> {
    let response = send(request).await?;
    let part_path = part_path(destination);

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&part_path)
        .await?;

    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(
                    path = %destination.display(),
                    bytes_so_far = bytes_written,
                    "Body stream error: {}",
                    e
                );
                drop(file);
                let _ = fs::remove_file(&part_path).await;
                return Err(e.into());
            }
        };
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&part_path, destination).await?;
    tracing::debug!(path = %destination.display(), bytes = bytes_written, "Downloaded file");
    Ok(bytes_written)
}

fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Extract every file in the zip at `archive` into `destination`.
///
/// Entries whose names would escape `destination` are skipped. Returns the
/// number of files written.
pub async fn extract_zip(archive: &Path, destination: &Path) -> Result<usize, CatalogError> {
    let archive = archive.to_path_buf();
    let destination = destination.to_path_buf();
    tokio::task::spawn_blocking(move || extract_zip_blocking(&archive, &destination))
        .await
        .map_err(|e| CatalogError::Archive(format!("extraction task failed: {}", e)))?
}

fn extract_zip_blocking(archive: &Path, destination: &Path) -> Result<usize, CatalogError> {
    let file = std::fs::File::open(archive)?;
    let mut zip =
        zip::ZipArchive::new(file).map_err(|e| CatalogError::Archive(e.to_string()))?;

    let mut extracted = 0;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| CatalogError::Archive(e.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(entry = entry.name(), "Skipping unsafe archive entry");
            continue;
        };
        let out_path = destination.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }
    Ok(extracted)
}

/// Parse catalog timestamps: RFC 3339, or naive ISO-8601 taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

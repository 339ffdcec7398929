//! Streaming download of release assets.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::api::types::ApiError;
use crate::runtime::path::ScratchDir;

/// Scratch scope for downloaded installers
pub const DOWNLOAD_SCOPE: &str = "updates";

const FALLBACK_FILE_NAME: &str = "update.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_read: u64,
    pub total_bytes: Option<u64>,
    pub percent: Option<u8>,
}

/// Turns byte counts into integer percentages, reporting each value once.
#[derive(Debug)]
pub struct PercentTracker {
    total: Option<u64>,
    last: Option<u8>,
}

impl PercentTracker {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            last: None,
        }
    }

    /// New percentage if it differs from the last reported one.
    ///
    /// Always `None` when the total size is unknown. Values never decrease
    /// and are clamped to 100.
    pub fn advance(&mut self, bytes_read: u64) -> Option<u8> {
        let total = self.total?;
        let percent = (bytes_read.saturating_mul(100) / total).min(100) as u8;
        if self.last.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last = Some(percent);
        Some(percent)
    }
}

/// File name for a download: the last path segment of the URL.
pub fn file_name_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|segments| segments.last().map(str::to_string))
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// Download `url` to `<temp_root>/updates/<uuid>/<file name>`.
///
/// Earlier downloads under `<temp_root>/updates` are removed first, so only
/// one download may run per `temp_root` at a time. `on_progress` is called
/// whenever the integer percentage changes. A failed download leaves nothing
/// behind. On Unix the finished file is executable.
pub async fn download_to<F>(
    client: &reqwest::Client,
    url: &str,
    temp_root: &Path,
    mut on_progress: F,
) -> Result<PathBuf, ApiError>
where
    F: FnMut(DownloadProgress),
{
    clear_previous_downloads(temp_root).await;
    let scratch = ScratchDir::create(temp_root, DOWNLOAD_SCOPE)?;
    let file_name = file_name_from_url(url);
    let target = scratch.join(&file_name);

    log::info!("Downloading {url} -> {}", target.display());

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ApiError::HttpFailure {
            status: None,
            message: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::HttpFailure {
            status: Some(status.as_u16()),
            message: status
                .canonical_reason()
                .unwrap_or("download failed")
                .to_string(),
        });
    }

    let total_bytes = response.content_length();
    let mut tracker = PercentTracker::new(total_bytes);

    let mut file = tokio::fs::File::create(&target)
        .await
        .map_err(|e| ApiError::IoFailure {
            message: format!("Failed to create {}: {e}", target.display()),
        })?;

    let mut bytes_read: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ApiError::HttpFailure {
            status: None,
            message: format!("Download interrupted: {e}"),
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::IoFailure {
                message: format!("Failed to write {}: {e}", target.display()),
            })?;
        bytes_read += chunk.len() as u64;

        if let Some(percent) = tracker.advance(bytes_read) {
            on_progress(DownloadProgress {
                bytes_read,
                total_bytes,
                percent: Some(percent),
            });
        }
    }

    file.flush().await.map_err(|e| ApiError::IoFailure {
        message: format!("Failed to flush {}: {e}", target.display()),
    })?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        tokio::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| ApiError::IoFailure {
                message: format!("Failed to mark {} executable: {e}", target.display()),
            })?;
    }

    log::info!("Download complete: {} bytes -> {}", bytes_read, target.display());

    Ok(scratch.persist().join(file_name))
}

/// Remove what earlier downloads left under `<temp_root>/updates`.
///
/// Failures are logged and never block a new download.
async fn clear_previous_downloads(temp_root: &Path) {
    let scope = temp_root.join(DOWNLOAD_SCOPE);
    let mut entries = match tokio::fs::read_dir(&scope).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            log::warn!("Failed to list {}: {e}", scope.display());
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                log::warn!("Failed to list {}: {e}", scope.display());
                break;
            }
        };

        let path = entry.path();
        let removed = match entry.file_type().await {
            Ok(kind) if kind.is_dir() => tokio::fs::remove_dir_all(&path).await,
            _ => tokio::fs::remove_file(&path).await,
        };
        match removed {
            Ok(()) => log::debug!("Removed previous download {}", path.display()),
            Err(e) => log::warn!("Failed to remove previous download {}: {e}", path.display()),
        }
    }
}

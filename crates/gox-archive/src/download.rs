//! HTTP download of archives, streamed to a scratch file and extracted.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{io_ctx, ArchiveError, Result};
use crate::extract::extract;
use crate::format::Format;

const USER_AGENT: &str = concat!("gox/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Streams release archives over HTTP and unpacks them.
///
/// Cancellation is the caller's: dropping the returned future (or racing it
/// against a timeout) aborts the in-flight transfer, and the scratch
/// directory is removed either way.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new() -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Downloader { client })
    }

    /// Downloads the archive at `url` and extracts it into `dest_dir`.
    pub async fn download(&self, url: &str, dest_dir: &Path) -> Result<()> {
        self.download_with_progress(url, dest_dir, None::<fn(u64, u64)>)
            .await
    }

    /// Like [`download`](Self::download), with a byte-count progress
    /// callback observing `(downloaded, total)`. `total` is 0 when the
    /// server sends no Content-Length.
    pub async fn download_with_progress<F>(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: Option<F>,
    ) -> Result<()>
    where
        F: Fn(u64, u64),
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ArchiveError::Request {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ArchiveError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let total = response.content_length().unwrap_or(0);

        // Scratch directory removed on drop, success or failure.
        let scratch = tempfile::tempdir()
            .map_err(|e| ArchiveError::io("create temp dir", std::env::temp_dir(), e))?;
        let archive_file = scratch
            .path()
            .join(format!("archive{}", Format::detect(url).ext()));

        let mut file = File::create(&archive_file)
            .await
            .map_err(io_ctx("create", &archive_file))?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ArchiveError::Request {
                url: url.to_string(),
                source: e,
            })?;
            file.write_all(&chunk)
                .await
                .map_err(io_ctx("write", &archive_file))?;
            downloaded += chunk.len() as u64;
            if let Some(ref callback) = progress {
                callback(downloaded, total);
            }
        }
        file.flush().await.map_err(io_ctx("flush", &archive_file))?;
        drop(file);

        if let Some(parent) = dest_dir.parent() {
            std::fs::create_dir_all(parent).map_err(io_ctx("mkdir", parent))?;
        }
        log::debug!(
            "downloaded {} ({} bytes), extracting to {}",
            url,
            downloaded,
            dest_dir.display()
        );
        extract(&archive_file, dest_dir)
    }

    /// Size of the archive at `url`, obtained with a HEAD request, for
    /// progress display only. Best effort: any failure yields 0.
    pub async fn content_length(&self, url: &str) -> u64 {
        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => {
                response.content_length().unwrap_or(0)
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_downloader_creation() {
        assert!(Downloader::new().is_ok());
    }

    #[tokio::test]
    async fn test_content_length_tolerates_failure() {
        let downloader = Downloader::new().unwrap();
        // Nothing listens on port 1; the probe must degrade to zero.
        assert_eq!(
            downloader.content_length("http://127.0.0.1:1/pkg.tar.gz").await,
            0
        );
    }

    #[tokio::test]
    async fn test_download_unreachable_host_fails() {
        let downloader = Downloader::new().unwrap();
        let tmp = TempDir::new().unwrap();
        let err = downloader
            .download("http://127.0.0.1:1/pkg.tar.gz", &tmp.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Request { .. }));
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_download_404_is_terminal() {
        let downloader = Downloader::new().unwrap();
        let tmp = TempDir::new().unwrap();
        let err = downloader
            .download("https://httpbin.org/status/404", &tmp.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::HttpStatus { status: 404, .. }));
    }
}

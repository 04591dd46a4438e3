use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Streams remote resources to local files.
///
/// This is the only component that touches the network. It never propagates
/// an error past its boundary: every failure is logged with its cause and
/// collapsed into a `false` result. A failed transfer is not retried; the
/// next application launch gets another attempt.
#[derive(Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|err| {
                warn!("downloader: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client }
    }

    /// Download `url` to `dest`, overwriting any existing file and creating
    /// parent directories as needed. `on_progress` receives a fraction in
    /// [0, 1] as bytes arrive (0.0 while the total size is unknown), with a
    /// final 1.0 once the body is complete.
    pub async fn download<F>(&self, url: &str, dest: &Path, on_progress: F) -> bool
    where
        F: FnMut(f32),
    {
        match self.try_download(url, dest, on_progress).await {
            Ok(()) => true,
            Err(err) => {
                warn!("download of {url} failed: {err}");
                false
            }
        }
    }

    async fn try_download<F>(
        &self,
        url: &str,
        dest: &Path,
        mut on_progress: F,
    ) -> Result<(), String>
    where
        F: FnMut(f32),
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("status error: {e}"))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create download dir: {e}"))?;
        }
        let mut file = File::create(dest)
            .await
            .map_err(|e| format!("failed to create file: {e}"))?;

        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("stream error: {e}"))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("write error: {e}"))?;
            downloaded += chunk.len() as u64;
            on_progress(fraction(downloaded, total));
        }

        file.flush().await.map_err(|e| format!("flush error: {e}"))?;

        if let Some(total) = total
            && downloaded < total
        {
            return Err(format!(
                "download incomplete: received {downloaded} of {total} bytes"
            ));
        }

        // A zero-length or unknown-length body still finishes at 1.0.
        on_progress(1.0);
        debug!(
            "downloaded {downloaded} bytes from {url} to {}",
            dest.display()
        );

        Ok(())
    }
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute transfer progress as a fraction of the expected total.
#[must_use]
pub fn fraction(downloaded: u64, total: Option<u64>) -> f32 {
    match total {
        Some(total) if total > 0 => ((downloaded as f64 / total as f64) as f32).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

//! Progressive (single-file) HTTP downloads

use std::path::Path;
use std::sync::Arc;

use crate::core::client::HttpClient;
use crate::core::error_handling::HlsResult;
use crate::core::progress_tracker::ProgressObserver;
use crate::core::segment_fetcher::CancelHandle;
use crate::utils::file_utils::ensure_dir_exists;

/// Streams a direct video URL (typically MP4) to disk
pub struct ProgressiveDownloader {
    client: Arc<HttpClient>,
    observer: Option<Arc<dyn ProgressObserver>>,
    cancel: CancelHandle,
}

impl ProgressiveDownloader {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            observer: None,
            cancel: CancelHandle::new(),
        }
    }

    /// Observer receives `(bytes_written, content_length)`; the total is 0 when unknown
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Download `url` to `output_path`; a partial file is removed on failure
    /// or cancellation.
    pub async fn download(&self, url: &str, output_path: &Path) -> HlsResult<u64> {
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_dir_exists(parent).await?;
            }
        }

        tracing::info!("Downloading {} -> {}", url, output_path.display());
        let observer = self.observer.clone();
        let result = self
            .client
            .stream_to_file(url, output_path, &self.cancel, move |written, total| {
                if let Some(observer) = &observer {
                    observer.on_progress(written as usize, total.unwrap_or(0) as usize);
                }
            })
            .await;

        match result {
            Ok(bytes) => {
                tracing::info!("Downloaded {} bytes", bytes);
                Ok(bytes)
            }
            Err(e) => {
                if e.is_interrupted() {
                    tracing::warn!("Download interrupted: {}", url);
                }
                let _ = tokio::fs::remove_file(output_path).await;
                Err(e)
            }
        }
    }
}

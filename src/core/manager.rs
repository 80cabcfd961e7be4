//! Download manager - entry point tying configuration to the download engines
//!
//! Picks the HLS pipeline or the progressive downloader by URL shape and
//! derives output paths when the caller gives none. Several URLs can be
//! run as one batch, each job with its own id and temp dir.

use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::client::{HttpClient, Transport};
use crate::core::config::AppConfig;
use crate::core::error_handling::HlsResult;
use crate::core::external::ExternalDownloader;
use crate::core::finalizer::{ContainerFinalizer, FinalizeOutcome};
use crate::core::m3u8_downloader::M3U8Downloader;
use crate::core::progress_tracker::ProgressObserver;
use crate::core::quality::QualityPreference;
use crate::core::segment_fetcher::CancelHandle;
use crate::downloaders::http_downloader::ProgressiveDownloader;
use crate::utils::file_utils::{output_path_for, title_from_url};
use crate::utils::validation::{is_m3u8_url, validate_url};

/// Outcome of one URL in a batch
#[derive(Debug)]
pub struct BatchItem {
    pub url: String,
    pub job_id: String,
    pub result: HlsResult<PathBuf>,
}

impl BatchItem {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct DownloadManager {
    config: AppConfig,
    client: Arc<HttpClient>,
    /// Used for playlists and segments; the client unless replaced
    transport: Arc<dyn Transport>,
    observer: Option<Arc<dyn ProgressObserver>>,
    cancel: CancelHandle,
}

impl DownloadManager {
    pub fn new(config: AppConfig) -> HlsResult<Self> {
        let client = Arc::new(HttpClient::new(config.client.clone())?);
        Ok(Self {
            config,
            transport: client.clone(),
            client,
            observer: None,
            cancel: CancelHandle::new(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Route HLS traffic through another transport
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Cancels every download started by this manager
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Default output path: `<output_dir>/<title>.<extension>`
    pub fn default_output_path(&self, url: &str, extension: &str) -> PathBuf {
        let title = title_from_url(url).unwrap_or_default();
        output_path_for(&self.config.download.output_dir, &title, extension)
    }

    fn extension_for(url: &str) -> &'static str {
        if is_m3u8_url(url) {
            "ts"
        } else {
            "mp4"
        }
    }

    async fn hls_downloader(&self) -> M3U8Downloader {
        let download = &self.config.download;
        let external = ExternalDownloader::detect(
            download.prefer_internal_downloader,
            &download.aria2c_path,
            download.retry_attempts,
            &self.config.client,
        )
        .await;

        let mut downloader = M3U8Downloader::new(download.clone(), self.transport.clone())
            .with_external(external)
            .with_cancel_handle(self.cancel.clone());
        if let Some(observer) = &self.observer {
            downloader = downloader.with_observer(Arc::clone(observer));
        }
        downloader
    }

    /// Download `url` and return the final file path.
    pub async fn download(
        &self,
        url: &str,
        preference: QualityPreference,
        output: Option<&Path>,
        job_id: Option<&str>,
    ) -> HlsResult<PathBuf> {
        validate_url(url)?;
        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_output_path(url, Self::extension_for(url)));

        if is_m3u8_url(url) {
            let outcome = self
                .hls_downloader()
                .await
                .download_stream(url, preference, &output, job_id)
                .await?;
            if let FinalizeOutcome::Failed { reason, .. } = &outcome.finalize {
                tracing::warn!("Conversion failed, kept original: {}", reason);
            }
            return Ok(outcome.path);
        }

        let mut downloader =
            ProgressiveDownloader::new(self.client.clone()).with_cancel_handle(self.cancel.clone());
        if let Some(observer) = &self.observer {
            downloader = downloader.with_observer(Arc::clone(observer));
        }
        downloader.download(url, &output).await?;

        let finalizer = ContainerFinalizer::new(
            &self.config.download.ffmpeg_path,
            self.config.download.keep_original,
        );
        Ok(finalizer.finalize(&output).await.into_path())
    }

    /// Download several URLs, at most `max_concurrent` at a time.
    ///
    /// Results come back in input order, one per URL; a failed URL does
    /// not stop the others. URLs whose default names collide get an
    /// index suffix. The progress observer sees every job's segments.
    pub async fn download_batch(
        &self,
        urls: &[String],
        preference: QualityPreference,
        max_concurrent: usize,
    ) -> Vec<BatchItem> {
        let batch_id = Uuid::new_v4().simple().to_string();
        let mut used = HashSet::new();
        let jobs: Vec<(String, String, PathBuf)> = urls
            .iter()
            .enumerate()
            .map(|(index, url)| {
                let extension = Self::extension_for(url);
                let mut output = self.default_output_path(url, extension);
                if !used.insert(output.clone()) {
                    let title = title_from_url(url).unwrap_or_else(|| "video".to_string());
                    output = output_path_for(
                        &self.config.download.output_dir,
                        &format!("{}_{}", title, index + 1),
                        extension,
                    );
                    used.insert(output.clone());
                }
                (url.clone(), format!("{}-{}", batch_id, index), output)
            })
            .collect();

        tracing::info!(
            "开始批量下载 {} 个视频 (并发 {})",
            jobs.len(),
            max_concurrent.max(1)
        );

        let items: Vec<BatchItem> = stream::iter(jobs)
            .map(|(url, job_id, output)| async move {
                let result = self
                    .download(&url, preference, Some(&output), Some(&job_id))
                    .await;
                match &result {
                    Ok(path) => tracing::info!("批量任务完成: {} -> {}", url, path.display()),
                    Err(e) => tracing::error!("批量任务失败: {} - {}", url, e),
                }
                BatchItem {
                    url,
                    job_id,
                    result,
                }
            })
            .buffered(max_concurrent.max(1))
            .collect()
            .await;

        let succeeded = items.iter().filter(|item| item.is_success()).count();
        tracing::info!("批量下载结束: {}/{} 成功", succeeded, items.len());
        items
    }

    /// Heights offered by an HLS URL, highest first
    pub async fn list_qualities(&self, url: &str) -> HlsResult<Vec<u32>> {
        self.hls_downloader().await.list_qualities(url).await
    }
}

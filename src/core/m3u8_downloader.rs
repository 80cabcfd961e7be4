//! M3U8/HLS 流媒体下载器
//!
//! 完整流程：
//! - 获取播放列表，主播放列表按画质偏好选择子流
//! - 解析媒体播放列表得到有序片段
//! - 片段并发下载、按索引合并
//! - 可选 AES-128 解密与 MP4 封装

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::client::{RequestKind, Transport};
use crate::core::config::DownloadConfig;
use crate::core::coordinator::DownloadCoordinator;
use crate::core::crypto::SegmentCipher;
use crate::core::error_handling::{FetchFailure, HlsError, HlsResult};
use crate::core::external::ExternalDownloader;
use crate::core::finalizer::ContainerFinalizer;
use crate::core::models::{DownloadJob, DownloadOutcome, JobState};
use crate::core::progress_tracker::ProgressObserver;
use crate::core::quality::{available_qualities, select_quality, QualityPreference};
use crate::core::segment_fetcher::{CancelHandle, SegmentFetcher};
use crate::parsers::m3u8_parser::{
    is_master_playlist, parse_encryption, parse_master, parse_media, parse_media_sequence,
    EncryptionInfo, QualityKey,
};
use crate::utils::validation::{validate_job_id, validate_url};

/// 解析完成的媒体播放列表
#[derive(Debug, Clone)]
pub struct ResolvedPlaylist {
    /// URL the segments were resolved against
    pub media_url: String,
    pub selected_quality: Option<QualityKey>,
    pub segments: Vec<String>,
    pub encryption: Option<EncryptionInfo>,
    pub media_sequence: u64,
}

/// M3U8下载器
pub struct M3U8Downloader {
    config: DownloadConfig,
    transport: Arc<dyn Transport>,
    external: Option<ExternalDownloader>,
    observer: Option<Arc<dyn ProgressObserver>>,
    cancel: CancelHandle,
}

impl M3U8Downloader {
    pub fn new(config: DownloadConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            external: None,
            observer: None,
            cancel: CancelHandle::new(),
        }
    }

    /// 设置进度回调
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_external(mut self, external: Option<ExternalDownloader>) -> Self {
        self.external = external;
        self
    }

    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that interrupts every download started by this downloader
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    async fn fetch_text(&self, url: &str) -> HlsResult<String> {
        tracing::debug!("获取M3U8播放列表: {}", url);
        let body = self.fetch(url, RequestKind::Playlist).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn fetch(&self, url: &str, kind: RequestKind) -> HlsResult<Bytes> {
        self.transport.get(url, kind).await.map_err(|failure| match failure {
            FetchFailure::Status(403) => HlsError::PermissionDenied {
                url: url.to_string(),
            },
            failure => HlsError::Request {
                url: url.to_string(),
                failure,
            },
        })
    }

    /// 获取并解析播放列表，主播放列表会先选择画质
    ///
    /// A master playlist without any usable stream falls back to being
    /// parsed as a media playlist.
    pub async fn resolve(
        &self,
        m3u8_url: &str,
        preference: QualityPreference,
    ) -> HlsResult<ResolvedPlaylist> {
        let mut media_url = m3u8_url.to_string();
        let mut content = self.fetch_text(m3u8_url).await?;
        let mut selected_quality = None;

        if is_master_playlist(&content) {
            let qualities = parse_master(&content, &validate_url(m3u8_url)?);
            if let Some(key) = select_quality(&qualities, preference) {
                let variant_url = qualities.get(key).unwrap_or(m3u8_url).to_string();
                tracing::info!("选择画质 {} ({}): {}", key, preference, variant_url);
                content = self.fetch_text(&variant_url).await?;
                selected_quality = Some(key.clone());
                media_url = variant_url;
            } else {
                tracing::debug!("主播放列表中没有可用子流，按媒体播放列表处理");
            }
        }

        let base = validate_url(&media_url)?;
        let segments = parse_media(&content, &base);
        if segments.is_empty() {
            return Err(HlsError::ParseEmpty {
                url: media_url,
                what: "segments",
            });
        }

        Ok(ResolvedPlaylist {
            encryption: parse_encryption(&content, &base),
            media_sequence: parse_media_sequence(&content),
            media_url,
            selected_quality,
            segments,
        })
    }

    /// Numeric heights offered by a master playlist, highest first
    pub async fn list_qualities(&self, m3u8_url: &str) -> HlsResult<Vec<u32>> {
        let content = self.fetch_text(m3u8_url).await?;
        if !is_master_playlist(&content) {
            return Ok(Vec::new());
        }
        let qualities = parse_master(&content, &validate_url(m3u8_url)?);
        Ok(available_qualities(&qualities))
    }

    async fn build_cipher(&self, playlist: &ResolvedPlaylist) -> HlsResult<Option<SegmentCipher>> {
        let Some(info) = &playlist.encryption else {
            return Ok(None);
        };
        if !info.is_aes128() {
            tracing::warn!("不支持的加密方式 {}，片段将按原样保存", info.method);
            return Ok(None);
        }
        let key_url = info
            .key_url
            .as_deref()
            .ok_or_else(|| HlsError::Decrypt("AES-128 key has no URI".to_string()))?;

        tracing::debug!("获取加密密钥: {}", key_url);
        let key = self.fetch(key_url, RequestKind::Key).await?;
        let cipher = SegmentCipher::new(&key, info, playlist.media_sequence)?;
        tracing::info!("已获取 AES-128 密钥");
        Ok(Some(cipher))
    }

    /// Temp dir for a job; a caller-supplied id lets a re-run reuse it.
    ///
    /// The id must name a single directory directly below `temp_root`,
    /// since the result is wiped before the job starts.
    pub fn temp_dir_for(&self, job_id: &str) -> HlsResult<PathBuf> {
        validate_job_id(job_id)?;
        let dir = self.config.temp_root.join(job_id);
        if dir.parent() != Some(self.config.temp_root.as_path()) {
            return Err(HlsError::Config(format!(
                "temp dir for job {:?} escapes {}",
                job_id,
                self.config.temp_root.display()
            )));
        }
        Ok(dir)
    }

    /// 下载M3U8流
    ///
    /// `job_id` scopes the temp dir. Without one a fresh UUID is used.
    pub async fn download_stream(
        &self,
        m3u8_url: &str,
        preference: QualityPreference,
        output_path: &Path,
        job_id: Option<&str>,
    ) -> HlsResult<DownloadOutcome> {
        tracing::info!("开始下载M3U8流: {}", m3u8_url);
        let job_id = job_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let temp_dir = self.temp_dir_for(&job_id)?;

        let playlist = self.resolve(m3u8_url, preference).await?;
        tracing::info!("解析到 {} 个片段", playlist.segments.len());

        let cipher = self.build_cipher(&playlist).await?;
        let fetcher = SegmentFetcher::new(Arc::clone(&self.transport), self.config.retry_policy())
            .with_cipher(cipher)
            .with_cancel_handle(self.cancel.clone());

        let mut coordinator = DownloadCoordinator::new(fetcher, self.config.max_workers)
            .with_buffer_size(self.config.buffer_size)
            .with_keep_temp_files(self.config.keep_temp_files)
            .with_external(self.external.clone());
        if let Some(observer) = &self.observer {
            coordinator = coordinator.with_observer(Arc::clone(observer));
        }

        let job = DownloadJob::new(job_id, output_path, playlist.segments, temp_dir);

        let report = coordinator.download(&job).await?;

        tracing::debug!(job = %job.id, state = ?JobState::Finalizing, "job state");
        let finalizer =
            ContainerFinalizer::new(&self.config.ffmpeg_path, self.config.keep_original);
        let finalize = finalizer.finalize(&report.output_path).await;
        tracing::debug!(job = %job.id, state = ?JobState::Done, "job state");

        tracing::info!("M3U8下载完成: {}", finalize.path().display());
        Ok(DownloadOutcome {
            path: finalize.path().to_path_buf(),
            selected_quality: playlist.selected_quality,
            report,
            finalize,
        })
    }
}

//! 片段并发下载与合并
//!
//! 每个任务拥有独立的临时目录和并发上限。所有片段任务结束后才判定结果：
//! 任一片段失败则整个任务失败，不会产出残缺文件。合并时按片段索引排序，
//! 与完成顺序无关。

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::core::error_handling::{HlsError, HlsResult};
use crate::core::external::ExternalDownloader;
use crate::core::models::{DownloadJob, DownloadReport, JobState, SegmentFile};
use crate::core::progress_tracker::{ProgressCounter, ProgressObserver};
use crate::core::segment_fetcher::SegmentFetcher;
use crate::utils::file_utils::{remove_dir_quietly, reset_dir};

/// Default worker pool width
pub const DEFAULT_MAX_WORKERS: usize = 8;

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Fans segment fetches out over a bounded pool and reassembles them in order
#[derive(Clone)]
pub struct DownloadCoordinator {
    fetcher: SegmentFetcher,
    max_workers: usize,
    buffer_size: usize,
    keep_temp_files: bool,
    observer: Option<Arc<dyn ProgressObserver>>,
    external: Option<ExternalDownloader>,
}

impl DownloadCoordinator {
    pub fn new(fetcher: SegmentFetcher, max_workers: usize) -> Self {
        Self {
            fetcher,
            max_workers: max_workers.max(1),
            buffer_size: DEFAULT_BUFFER_SIZE,
            keep_temp_files: false,
            observer: None,
            external: None,
        }
    }

    /// 设置进度回调
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn with_keep_temp_files(mut self, keep: bool) -> Self {
        self.keep_temp_files = keep;
        self
    }

    /// Hand whole segment lists to an external tool instead of the worker pool
    pub fn with_external(mut self, external: Option<ExternalDownloader>) -> Self {
        self.external = external;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// 下载所有片段并合并到 `job.target_path`
    ///
    /// `job.temp_dir` is wiped and recreated first; it must not be shared
    /// with another running job. The temp dir is removed afterwards on
    /// success and on failure, but not when the job was interrupted.
    pub async fn download(&self, job: &DownloadJob) -> HlsResult<DownloadReport> {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let total = job.segments.len();

        self.transition(job, JobState::FetchingSegments);
        tracing::info!("开始下载 {} 个片段 (并发 {})", total, self.max_workers);
        reset_dir(&job.temp_dir).await?;

        let counter = ProgressCounter::new(total, self.observer.clone());
        let fetched = match &self.external {
            Some(external) if !self.fetcher.is_encrypted() => {
                let result = external
                    .fetch_all(&job.segments, &job.temp_dir, self.max_workers)
                    .await;
                if let Ok(files) = &result {
                    counter.finish_all(files.len());
                }
                result
            }
            _ => self.fetch_all(job, &counter).await,
        };

        let mut files = match fetched {
            Ok(files) => files,
            Err(HlsError::Interrupted) => {
                tracing::warn!("下载被中断，临时目录保留: {}", job.temp_dir.display());
                return Err(HlsError::Interrupted);
            }
            Err(e) => {
                tracing::error!("片段下载失败: {}", e);
                self.transition(job, JobState::CleaningUp);
                self.cleanup(&job.temp_dir).await;
                self.transition(job, JobState::Failed);
                return Err(e);
            }
        };

        self.transition(job, JobState::Merging);
        files.sort_by_key(|file| file.index);

        let bytes_written = match self.merge_segments(&files, &job.target_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("片段合并失败: {}", e);
                let _ = tokio::fs::remove_file(&job.target_path).await;
                self.cleanup(&job.temp_dir).await;
                self.transition(job, JobState::Failed);
                return Err(e);
            }
        };

        self.cleanup(&job.temp_dir).await;
        tracing::info!(
            "合并完成: {} ({} bytes)",
            job.target_path.display(),
            bytes_written
        );

        Ok(DownloadReport {
            output_path: job.target_path.clone(),
            segment_count: total,
            bytes_written,
            elapsed: start.elapsed(),
            started_at,
            finished_at: chrono::Utc::now(),
        })
    }

    /// Run every fetch to completion, then decide the outcome
    async fn fetch_all(
        &self,
        job: &DownloadJob,
        counter: &ProgressCounter,
    ) -> HlsResult<Vec<SegmentFile>> {
        let total = job.segments.len();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for (index, url) in job.segments.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let fetcher = self.fetcher.clone();
            let counter = counter.clone();
            let url = url.clone();
            let dir = job.temp_dir.clone();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| HlsError::Interrupted)?;
                let file = fetcher.fetch(&url, index, &dir).await?;
                counter.increment();
                Ok::<_, HlsError>(file)
            });
        }

        let mut files = Vec::with_capacity(total);
        let mut interrupted = false;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(file)) => files.push(file),
                Ok(Err(HlsError::Interrupted)) => interrupted = true,
                Ok(Err(e)) => tracing::warn!("{}", e),
                Err(e) => tracing::error!("片段任务异常退出: {}", e),
            }
        }

        if interrupted || self.fetcher.cancel_handle().is_cancelled() {
            return Err(HlsError::Interrupted);
        }

        if files.len() < total {
            let done: HashSet<usize> = files.iter().map(|file| file.index).collect();
            let failed: Vec<usize> = (0..total).filter(|i| !done.contains(i)).collect();
            return Err(HlsError::JobAggregateFailure { failed, total });
        }

        tracing::info!("所有片段下载完成");
        Ok(files)
    }

    /// 合并片段为最终文件，`files` 必须已按索引排序
    async fn merge_segments(&self, files: &[SegmentFile], output_path: &Path) -> HlsResult<u64> {
        tracing::info!("合并 {} 个片段到: {}", files.len(), output_path.display());

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut output = File::create(output_path).await?;
        let mut buffer = vec![0u8; self.buffer_size];
        let mut written = 0u64;

        for file in files {
            let mut input = File::open(&file.local_path).await?;
            loop {
                let read = input.read(&mut buffer).await?;
                if read == 0 {
                    break;
                }
                output.write_all(&buffer[..read]).await?;
                written += read as u64;
            }
        }

        output.flush().await?;
        output.sync_all().await?;
        Ok(written)
    }

    async fn cleanup(&self, temp_dir: &Path) {
        if self.keep_temp_files {
            tracing::info!("根据配置保留临时分片目录: {}", temp_dir.display());
            return;
        }
        tracing::debug!("清理临时目录: {}", temp_dir.display());
        remove_dir_quietly(temp_dir).await;
    }

    fn transition(&self, job: &DownloadJob, state: JobState) {
        tracing::debug!(job = %job.id, ?state, "job state");
    }
}

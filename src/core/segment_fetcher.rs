//! 单个片段下载（带重试）

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::core::client::{RequestKind, Transport};
use crate::core::crypto::SegmentCipher;
use crate::core::error_handling::{FetchFailure, HlsError, HlsResult, RetryPolicy};
use crate::core::models::SegmentFile;

/// Shared cancellation flag for one job
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// File name of the segment at `index` inside a job's temp dir
pub fn segment_file_name(index: usize) -> String {
    format!("segment_{:06}.ts", index)
}

/// Downloads one segment to disk, retrying transport and status failures
#[derive(Clone)]
pub struct SegmentFetcher {
    transport: Arc<dyn Transport>,
    retry_policy: RetryPolicy,
    cipher: Option<Arc<SegmentCipher>>,
    cancel: CancelHandle,
}

impl SegmentFetcher {
    pub fn new(transport: Arc<dyn Transport>, retry_policy: RetryPolicy) -> Self {
        Self {
            transport,
            retry_policy,
            cipher: None,
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_cipher(mut self, cipher: Option<SegmentCipher>) -> Self {
        self.cipher = cipher.map(Arc::new);
        self
    }

    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// 下载片段到 `save_dir`，失败时按策略重试
    ///
    /// Only exhaustion surfaces: intermediate failures are logged and retried.
    pub async fn fetch(&self, url: &str, index: usize, save_dir: &Path) -> HlsResult<SegmentFile> {
        let local_path = save_dir.join(segment_file_name(index));
        let max_attempts = self.retry_policy.max_attempts;
        let mut last_failure = FetchFailure::Transport("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(HlsError::Interrupted);
            }

            match self.transport.get(url, RequestKind::Segment).await {
                Ok(data) => {
                    let written = self.write_segment(&data, index, &local_path).await?;
                    tracing::debug!(
                        "片段 #{} 下载完成 ({} bytes, 第 {} 次尝试)",
                        index,
                        written,
                        attempt
                    );
                    return Ok(SegmentFile {
                        index,
                        local_path,
                        bytes: written,
                    });
                }
                Err(failure) => {
                    tracing::warn!(
                        "片段 #{} 第 {}/{} 次下载失败: {} - {}",
                        index,
                        attempt,
                        max_attempts,
                        url,
                        failure
                    );
                    last_failure = failure;
                    if self.retry_policy.has_next(attempt) {
                        self.backoff(attempt).await?;
                    }
                }
            }
        }

        Err(HlsError::SegmentFetchExhausted {
            index,
            attempts: max_attempts,
            last: last_failure,
        })
    }

    async fn backoff(&self, failed_attempt: u32) -> HlsResult<()> {
        let delay = self.retry_policy.delay_after(failed_attempt);
        if delay.is_zero() {
            return Ok(());
        }

        // wake up early on cancellation
        let step = std::time::Duration::from_millis(50);
        let deadline = tokio::time::Instant::now() + delay;
        while tokio::time::Instant::now() < deadline {
            if self.cancel.is_cancelled() {
                return Err(HlsError::Interrupted);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            tokio::time::sleep(remaining.min(step)).await;
        }
        Ok(())
    }

    async fn write_segment(&self, data: &[u8], index: usize, path: &Path) -> HlsResult<u64> {
        let decrypted;
        let payload = match &self.cipher {
            Some(cipher) => {
                decrypted = cipher.decrypt(data, index)?;
                decrypted.as_slice()
            }
            None => data,
        };

        let mut file = File::create(path).await?;
        file.write_all(payload).await?;
        file.flush().await?;
        Ok(payload.len() as u64)
    }
}

/// Path of segment `index` inside `dir`, if it was written
pub fn existing_segment_path(dir: &Path, index: usize) -> Option<PathBuf> {
    let path = dir.join(segment_file_name(index));
    path.is_file().then_some(path)
}

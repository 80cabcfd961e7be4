//! 片段协调器集成测试
//!
//! 使用内存传输层验证：
//! - 乱序完成时仍按索引合并
//! - 全部成功或整体失败，失败时清理临时目录
//! - 并发上限与进度回调

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::client::{RequestKind, Transport};
use super::error_handling::FetchFailure;

#[derive(Clone)]
struct Route {
    body: Bytes,
    delay: Duration,
    failures_left: u32,
    status: Option<u16>,
}

/// In-memory transport keyed by URL; unknown URLs answer 404
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn serve(&self, url: &str, body: impl Into<Bytes>) {
        self.routes.lock().insert(
            url.to_string(),
            Route {
                body: body.into(),
                delay: Duration::ZERO,
                failures_left: 0,
                status: None,
            },
        );
    }

    pub(crate) fn delay(&self, url: &str, delay: Duration) {
        if let Some(route) = self.routes.lock().get_mut(url) {
            route.delay = delay;
        }
    }

    /// Transport errors for the next `times` requests to `url`
    pub(crate) fn fail_times(&self, url: &str, times: u32) {
        if let Some(route) = self.routes.lock().get_mut(url) {
            route.failures_left = times;
        }
    }

    pub(crate) fn respond_status(&self, url: &str, status: u16) {
        self.routes.lock().insert(
            url.to_string(),
            Route {
                body: Bytes::new(),
                delay: Duration::ZERO,
                failures_left: 0,
                status: Some(status),
            },
        );
    }

    pub(crate) fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str, _kind: RequestKind) -> Result<Bytes, FetchFailure> {
        *self.calls.lock().entry(url.to_string()).or_insert(0) += 1;

        let route = {
            let mut routes = self.routes.lock();
            let Some(route) = routes.get_mut(url) else {
                return Err(FetchFailure::Status(404));
            };
            let snapshot = route.clone();
            route.failures_left = route.failures_left.saturating_sub(1);
            snapshot
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if route.failures_left > 0 {
            return Err(FetchFailure::Transport("connection reset".to_string()));
        }
        if let Some(status) = route.status {
            return Err(FetchFailure::Status(status));
        }
        Ok(route.body)
    }
}

#[cfg(test)]
mod tests {
    use super::super::coordinator::DownloadCoordinator;
    use super::super::error_handling::{HlsError, RetryPolicy};
    use super::super::models::DownloadJob;
    use super::super::progress_tracker::ProgressObserver;
    use super::super::segment_fetcher::{CancelHandle, SegmentFetcher};
    use super::FakeTransport;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn segment_url(index: usize) -> String {
        format!("http://cdn.example/seg{}.ts", index)
    }

    fn segment_body(index: usize) -> Vec<u8> {
        format!("<segment {}>", index).into_bytes()
    }

    /// Transport serving `count` segments with distinct bodies
    fn transport_with_segments(count: usize) -> Arc<FakeTransport> {
        let transport = Arc::new(FakeTransport::new());
        for index in 0..count {
            transport.serve(&segment_url(index), segment_body(index));
        }
        transport
    }

    fn job(root: &Path, count: usize) -> DownloadJob {
        DownloadJob::new(
            "job-1",
            root.join("out").join("video.ts"),
            (0..count).map(segment_url).collect(),
            root.join("tmp").join("job-1"),
        )
    }

    fn coordinator(transport: Arc<FakeTransport>, workers: usize) -> DownloadCoordinator {
        let fetcher = SegmentFetcher::new(transport, RetryPolicy::immediate(5));
        DownloadCoordinator::new(fetcher, workers)
    }

    fn expected_output(count: usize) -> Vec<u8> {
        (0..count).flat_map(segment_body).collect()
    }

    #[tokio::test]
    async fn test_merge_follows_index_order_not_completion_order() {
        let root = tempdir().unwrap();
        let transport = transport_with_segments(6);
        // segment 0 finishes last, segment 5 first
        for index in 0..6 {
            transport.delay(&segment_url(index), Duration::from_millis((6 - index as u64) * 30));
        }

        let job = job(root.path(), 6);
        let report = coordinator(transport, 6).download(&job).await.unwrap();

        assert_eq!(std::fs::read(&job.target_path).unwrap(), expected_output(6));
        assert_eq!(report.segment_count, 6);
        assert_eq!(report.bytes_written, expected_output(6).len() as u64);
        assert!(report.finished_at >= report.started_at);
        assert!(!job.temp_dir.exists());
    }

    #[tokio::test]
    async fn test_one_exhausted_segment_fails_the_whole_job() {
        let root = tempdir().unwrap();
        let transport = transport_with_segments(5);
        transport.fail_times(&segment_url(2), u32::MAX);

        let job = job(root.path(), 5);
        let err = coordinator(transport.clone(), 3)
            .download(&job)
            .await
            .unwrap_err();

        match &err {
            HlsError::JobAggregateFailure { failed, total } => {
                assert_eq!(failed, &vec![2]);
                assert_eq!(*total, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.calls_to(&segment_url(2)), 5);
        // the other segments still ran to completion
        assert_eq!(transport.calls_to(&segment_url(4)), 1);
        assert!(!job.target_path.exists());
        assert!(!job.temp_dir.exists());
    }

    #[tokio::test]
    async fn test_segment_recovering_on_last_attempt_completes() {
        let root = tempdir().unwrap();
        let transport = transport_with_segments(3);
        transport.fail_times(&segment_url(1), 4);

        let job = job(root.path(), 3);
        coordinator(transport.clone(), 2).download(&job).await.unwrap();

        assert_eq!(transport.calls_to(&segment_url(1)), 5);
        assert_eq!(std::fs::read(&job.target_path).unwrap(), expected_output(3));
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let root = tempdir().unwrap();
        let transport = transport_with_segments(10);
        for index in 0..10 {
            transport.delay(&segment_url(index), Duration::from_millis(20));
        }

        let job = job(root.path(), 10);
        let coordinator = coordinator(transport.clone(), 3);
        assert_eq!(coordinator.max_workers(), 3);
        coordinator.download(&job).await.unwrap();

        assert!(transport.max_in_flight() <= 3);
        assert!(transport.max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_progress_reaches_total() {
        let root = tempdir().unwrap();
        let transport = transport_with_segments(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Arc<dyn ProgressObserver> = Arc::new(move |completed: usize, total: usize| {
            sink.lock().push((completed, total));
        });

        let job = job(root.path(), 8);
        coordinator(transport, 4)
            .with_observer(observer)
            .download(&job)
            .await
            .unwrap();

        let mut seen = seen.lock().clone();
        assert_eq!(seen.len(), 8);
        assert!(seen.iter().all(|(_, total)| *total == 8));
        seen.sort();
        let completed: Vec<usize> = seen.iter().map(|(completed, _)| *completed).collect();
        assert_eq!(completed, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_stale_temp_dir_contents_are_discarded() {
        let root = tempdir().unwrap();
        let transport = transport_with_segments(2);
        let job = job(root.path(), 2);

        std::fs::create_dir_all(&job.temp_dir).unwrap();
        std::fs::write(job.temp_dir.join("segment_000000.ts"), b"stale bytes").unwrap();
        std::fs::write(job.temp_dir.join("leftover.tmp"), b"junk").unwrap();

        coordinator(transport, 2)
            .with_keep_temp_files(true)
            .download(&job)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&job.target_path).unwrap(), expected_output(2));
        assert!(job.temp_dir.exists());
        assert!(!job.temp_dir.join("leftover.tmp").exists());
    }

    #[tokio::test]
    async fn test_cancelled_job_is_interrupted_and_keeps_temp_dir() {
        let root = tempdir().unwrap();
        let transport = transport_with_segments(4);
        let cancel = CancelHandle::new();
        cancel.cancel();

        let fetcher =
            SegmentFetcher::new(transport.clone(), RetryPolicy::immediate(5)).with_cancel_handle(cancel);
        let job = job(root.path(), 4);
        let err = DownloadCoordinator::new(fetcher, 2)
            .download(&job)
            .await
            .unwrap_err();

        assert!(err.is_interrupted());
        assert!(err.failed_indices().is_empty());
        assert!(job.temp_dir.exists());
        assert!(!job.target_path.exists());
        assert_eq!(transport.calls_to(&segment_url(0)), 0);
    }

    #[tokio::test]
    async fn test_empty_job_writes_empty_file() {
        let root = tempdir().unwrap();
        let job = job(root.path(), 0);

        let report = coordinator(Arc::new(FakeTransport::new()), 2)
            .download(&job)
            .await
            .unwrap();

        assert_eq!(report.bytes_written, 0);
        assert!(job.target_path.exists());
    }
}

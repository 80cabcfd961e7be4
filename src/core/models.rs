//! Core data models for the HLS download pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::finalizer::FinalizeOutcome;
use crate::parsers::m3u8_parser::QualityKey;

/// A downloaded segment, owned by its job until merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    pub index: usize,
    pub local_path: PathBuf,
    pub bytes: u64,
}

/// One stream download: where to write, what to fetch, where to stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: String,
    pub target_path: PathBuf,
    pub segments: Vec<String>,
    pub temp_dir: PathBuf,
}

impl DownloadJob {
    pub fn new(
        id: impl Into<String>,
        target_path: impl Into<PathBuf>,
        segments: Vec<String>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            target_path: target_path.into(),
            segments,
            temp_dir: temp_dir.into(),
        }
    }
}

/// Lifecycle of a single download job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    FetchingSegments,
    Merging,
    Finalizing,
    Done,
    CleaningUp,
    Failed,
}

/// Result of a successful segment download and merge
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub output_path: PathBuf,
    pub segment_count: usize,
    pub bytes_written: u64,
    pub elapsed: Duration,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// Result of the whole pipeline for one URL
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub selected_quality: Option<QualityKey>,
    pub report: DownloadReport,
    pub finalize: FinalizeOutcome,
}

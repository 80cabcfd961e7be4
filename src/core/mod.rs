//! Core business logic module
//!
//! This module contains the HLS download pipeline: transport, segment
//! fetching, coordination, reassembly and container finalization.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod error_handling;
pub mod external;
pub mod finalizer;
pub mod m3u8_downloader;
pub mod manager;
pub mod models;
pub mod progress_tracker;
pub mod quality;
pub mod segment_fetcher;

#[cfg(test)]
mod coordinator_integration_tests;


// Re-export commonly used types
pub use client::{ClientConfig, HttpClient, RequestKind, Transport};
pub use config::{AppConfig, DownloadConfig};
pub use coordinator::DownloadCoordinator;
pub use error_handling::{Backoff, FetchFailure, HlsError, HlsResult, RetryPolicy};
pub use finalizer::{ContainerFinalizer, FinalizeOutcome};
pub use m3u8_downloader::M3U8Downloader;
pub use manager::{BatchItem, DownloadManager};
pub use models::{DownloadJob, DownloadOutcome, DownloadReport, JobState, SegmentFile};
pub use progress_tracker::{ChannelObserver, ProgressObserver, ProgressUpdate};
pub use quality::{select_quality, QualityPreference};
pub use segment_fetcher::{CancelHandle, SegmentFetcher};

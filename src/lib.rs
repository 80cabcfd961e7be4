//! HLS Downloader - Core Library
//!
//! Downloads HTTP Live Streaming content: master playlist quality selection,
//! bounded concurrent segment fetching with retry, ordered reassembly and
//! an optional ffmpeg remux into MP4.

pub mod core;
pub mod downloaders;
pub mod parsers;
pub mod utils;

// Re-export commonly used types
pub use core::{
    config::{AppConfig, DownloadConfig},
    coordinator::DownloadCoordinator,
    error_handling::{HlsError, HlsResult, RetryPolicy},
    finalizer::{ContainerFinalizer, FinalizeOutcome},
    m3u8_downloader::M3U8Downloader,
    manager::DownloadManager,
    models::{DownloadJob, DownloadOutcome, DownloadReport},
    progress_tracker::{ProgressObserver, ProgressUpdate},
    quality::QualityPreference,
    segment_fetcher::{CancelHandle, SegmentFetcher},
};
pub use downloaders::ProgressiveDownloader;
pub use parsers::{parse_master, parse_media, QualityKey, QualityMap};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging with the default filter
pub fn init() -> anyhow::Result<()> {
    // 忽略重复初始化
    utils::logging::init_tracing(None);
    tracing::info!("{} v{} initialized", NAME, VERSION);
    Ok(())
}

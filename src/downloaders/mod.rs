//! Download engines for non-HLS sources

pub mod http_downloader;

pub use http_downloader::*;

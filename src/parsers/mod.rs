//! Playlist parsing modules
//!
//! Contains the text-level parsers for HLS master and media playlists.

pub mod m3u8_parser;

// Re-export commonly used parsers
pub use m3u8_parser::*;

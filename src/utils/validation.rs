//! URL and input validation utilities

use std::path::{Component, Path};
use url::Url;

use crate::core::error_handling::{HlsError, HlsResult};

/// Parse a URL, mapping failures into the crate error
pub fn validate_url(url: &str) -> HlsResult<Url> {
    Url::parse(url).map_err(|source| HlsError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

/// A job id must name exactly one directory below the temp root
pub fn validate_job_id(job_id: &str) -> HlsResult<()> {
    let mut components = Path::new(job_id).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || job_id.contains(['/', '\\']) {
        return Err(HlsError::Config(format!("invalid job id {:?}", job_id)));
    }
    Ok(())
}

/// Whether the URL looks like an HLS playlist
pub fn is_m3u8_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    match Url::parse(&lower) {
        Ok(parsed) => parsed.path().ends_with(".m3u8") || lower.contains("m3u8"),
        Err(_) => lower.contains("m3u8"),
    }
}

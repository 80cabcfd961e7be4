//! File system utilities

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::error_handling::HlsResult;

const MAX_FILENAME_CHARS: usize = 200;

/// Ensure directory exists
pub async fn ensure_dir_exists(path: &Path) -> HlsResult<()> {
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

/// Recreate `dir` empty. Any previous contents are deleted.
pub async fn reset_dir(dir: &Path) -> HlsResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Best-effort recursive removal; errors are logged and swallowed
pub async fn remove_dir_quietly(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!("Failed to remove {}: {}", dir.display(), e);
        }
    }
}

/// Sanitize a title into a filesystem-safe name
///
/// Falls back to `video_<unix-seconds>` when nothing usable remains.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        return format!("video_{}", secs);
    }

    collapsed.chars().take(MAX_FILENAME_CHARS).collect()
}

/// `<output_dir>/<sanitized title>.<extension>`
pub fn output_path_for(output_dir: &Path, title: &str, extension: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", sanitize_filename(title), extension))
}

/// Last path segment of a URL without its extension, used as a title fallback
pub fn title_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let stem = Path::new(last).file_stem()?.to_str()?;
    (!stem.is_empty()).then(|| stem.to_string())
}

//! Container finalization: remux the merged transport stream to MP4
//!
//! Conversion never fails a download. A missing tool or a failed remux
//! leaves the original file in place and reports why.

use std::path::{Path, PathBuf};
use tokio::process::Command;

/// What happened to the merged file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Remuxed; the original was removed
    Converted(PathBuf),
    /// Conversion not requested or not needed
    Kept(PathBuf),
    /// Remux tool not runnable on this host
    ToolMissing(PathBuf),
    /// Tool ran and failed; original kept
    Failed { path: PathBuf, reason: String },
}

impl FinalizeOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Converted(path) | Self::Kept(path) | Self::ToolMissing(path) => path,
            Self::Failed { path, .. } => path,
        }
    }

    pub fn into_path(self) -> PathBuf {
        match self {
            Self::Converted(path) | Self::Kept(path) | Self::ToolMissing(path) => path,
            Self::Failed { path, .. } => path,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::ToolMissing(_) | Self::Failed { .. })
    }
}

/// Remuxes through ffmpeg with stream copy
#[derive(Debug, Clone)]
pub struct ContainerFinalizer {
    ffmpeg_path: PathBuf,
    keep_original: bool,
}

impl ContainerFinalizer {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, keep_original: bool) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            keep_original,
        }
    }

    /// Remux `input` next to itself as `.mp4`.
    pub async fn finalize(&self, input: &Path) -> FinalizeOutcome {
        if self.keep_original {
            return FinalizeOutcome::Kept(input.to_path_buf());
        }

        if input
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("mp4"))
        {
            return FinalizeOutcome::Kept(input.to_path_buf());
        }

        if !self.tool_available().await {
            tracing::info!(
                "{} not available, keeping {}",
                self.ffmpeg_path.display(),
                input.display()
            );
            return FinalizeOutcome::ToolMissing(input.to_path_buf());
        }

        let output = input.with_extension("mp4");
        tracing::info!("Remuxing {} -> {}", input.display(), output.display());

        let result = Command::new(&self.ffmpeg_path)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-c", "copy", "-bsf:a", "aac_adtstoasc"])
            .arg(&output)
            .output()
            .await;

        match result {
            Ok(out) if out.status.success() => {
                if let Err(e) = tokio::fs::remove_file(input).await {
                    tracing::warn!("Failed to remove {}: {}", input.display(), e);
                }
                FinalizeOutcome::Converted(output)
            }
            Ok(out) => {
                let reason = format!(
                    "{} ({})",
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                tracing::warn!("Remux failed, keeping original: {}", reason);
                // ffmpeg may leave a truncated output behind
                let _ = tokio::fs::remove_file(&output).await;
                FinalizeOutcome::Failed {
                    path: input.to_path_buf(),
                    reason,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to launch {}: {}", self.ffmpeg_path.display(), e);
                FinalizeOutcome::Failed {
                    path: input.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn tool_available(&self) -> bool {
        crate::utils::is_tool_available(&self.ffmpeg_path, &["-version"]).await
    }
}

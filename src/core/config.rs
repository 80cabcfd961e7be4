//! Application configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::client::ClientConfig;
use crate::core::coordinator::DEFAULT_MAX_WORKERS;
use crate::core::error_handling::{Backoff, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::core::quality::QualityPreference;

/// Main application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub download: DownloadConfig,
    pub client: ClientConfig,
    pub log_level: Option<String>, // "error", "warn", "info", "debug", "trace"
}

/// Download pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub output_dir: PathBuf,
    /// Per-job temp dirs are created below this directory
    pub temp_root: PathBuf,
    pub max_workers: usize,
    pub retry_attempts: u32,
    pub retry_step_ms: u64,
    pub quality: String, // "best", "worst", "720", ...
    /// Skip remuxing and keep the merged .ts
    pub keep_original: bool,
    pub keep_temp_files: bool,
    pub prefer_internal_downloader: bool,
    pub ffmpeg_path: PathBuf,
    pub aria2c_path: PathBuf,
    pub buffer_size: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./downloads"),
            temp_root: std::env::temp_dir().join("hls_downloader"),
            max_workers: DEFAULT_MAX_WORKERS,
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_step_ms: 500,
            quality: "best".to_string(),
            keep_original: false,
            keep_temp_files: false,
            prefer_internal_downloader: true,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            aria2c_path: PathBuf::from("aria2c"),
            buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl DownloadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Backoff::Linear {
                step: Duration::from_millis(self.retry_step_ms),
            },
        )
    }

    pub fn quality_preference(&self) -> QualityPreference {
        // FromStr is infallible
        self.quality.parse().unwrap_or_default()
    }
}

impl AppConfig {
    /// Load configuration from the default location, creating it if missing.
    ///
    /// An unreadable or invalid file falls back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            return Ok(config);
        }

        match Self::load_from(&config_path) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!(
                    "Failed to load configuration ({:#}), falling back to defaults",
                    err
                );
                Ok(Self::default())
            }
        }
    }

    /// Load and validate a configuration file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppConfig =
            serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;
        config.validate()?;

        tracing::info!("Loaded configuration from: {:?}", path);
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        tracing::debug!("Saved configuration to: {:?}", path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "videodownloader", "hls")
            .with_context(|| "Failed to get project directories")?;

        Ok(project_dirs.config_dir().join("config.json"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let download = &self.download;
        if download.max_workers == 0 {
            anyhow::bail!("max_workers must be greater than 0");
        }
        if download.max_workers > 64 {
            anyhow::bail!("max_workers cannot exceed 64");
        }
        if download.retry_attempts == 0 {
            anyhow::bail!("retry_attempts must be greater than 0");
        }
        if download.buffer_size == 0 {
            anyhow::bail!("buffer_size must be greater than 0");
        }
        if self.client.playlist_timeout_secs == 0 || self.client.segment_timeout_secs == 0 {
            anyhow::bail!("timeouts must be greater than 0");
        }
        if let Some(proxy) = &self.client.proxy {
            url::Url::parse(proxy).with_context(|| format!("Invalid proxy URL: {}", proxy))?;
        }
        self.client
            .header_map()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(())
    }
}

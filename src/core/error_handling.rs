//! Error taxonomy and retry policy for the HLS download pipeline
//!
//! Transient failures are classified per attempt as [`FetchFailure`] and
//! retried locally by the segment fetcher according to a [`RetryPolicy`].
//! Only exhaustion, aggregate job failure and user interruption surface
//! to callers as [`HlsError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default number of attempts per segment
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default linear backoff step (0.5s, 1.0s, 1.5s, ...)
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(500);

/// Classification of a single failed request attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchFailure {
    /// Connection, DNS, timeout or body read error
    Transport(String),
    /// Server answered with a non-success status code
    Status(u16),
}

impl FetchFailure {
    pub fn transport(err: impl fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status(code) => Some(*code),
            Self::Transport(_) => None,
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "transport error: {}", message),
            Self::Status(code) => write!(f, "HTTP status {}", code),
        }
    }
}

/// Errors surfaced by the download pipeline
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("playlist {url} contained no {what}")]
    ParseEmpty { url: String, what: &'static str },

    #[error("segment #{index} failed after {attempts} attempts: {last}")]
    SegmentFetchExhausted {
        index: usize,
        attempts: u32,
        last: FetchFailure,
    },

    #[error("{} of {total} segments failed", failed.len())]
    JobAggregateFailure { failed: Vec<usize>, total: usize },

    #[error("download interrupted")]
    Interrupted,

    #[error("access to {url} was denied (HTTP 403), check Referer/User-Agent headers")]
    PermissionDenied { url: String },

    #[error("request to {url} failed: {failure}")]
    Request { url: String, failure: FetchFailure },

    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decryption error: {0}")]
    Decrypt(String),

    #[error("External tool error: {0}")]
    ExternalTool(String),
}

impl HlsError {
    /// Segment indices that caused a job failure, empty for other variants
    pub fn failed_indices(&self) -> &[usize] {
        match self {
            Self::JobAggregateFailure { failed, .. } => failed,
            _ => &[],
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

pub type HlsResult<T> = Result<T, HlsError>;

/// Delay schedule between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// No delay at all
    None,
    /// Same delay after every failed attempt
    Fixed(Duration),
    /// `step * n` after the n-th failed attempt
    Linear { step: Duration },
}

/// Bounded retry policy shared by every segment fetch of a job
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Linear {
                step: DEFAULT_BACKOFF_STEP,
            },
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Policy without delays, used where waiting buys nothing
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Backoff::None)
    }

    /// Delay to wait after the given 1-based attempt failed.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Linear { step } => step.saturating_mul(failed_attempt),
        }
    }

    /// Whether another attempt follows the given 1-based attempt
    pub fn has_next(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

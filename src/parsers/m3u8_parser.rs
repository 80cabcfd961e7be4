//! M3U8 playlist parsing utilities
//!
//! Both parse paths are pure: the same text and base URL always produce the
//! same output, and "nothing found" is an empty collection rather than an
//! error. Callers decide whether emptiness is fatal.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use url::Url;

/// Tag introducing a variant stream in a master playlist
pub const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";

const KEY_TAG: &str = "#EXT-X-KEY:";
const MEDIA_SEQUENCE_TAG: &str = "#EXT-X-MEDIA-SEQUENCE:";

/// Key of a variant stream: its height when declared, otherwise an opaque marker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityKey {
    Numeric(u32),
    Opaque(String),
}

impl QualityKey {
    pub fn height(&self) -> Option<u32> {
        match self {
            Self::Numeric(height) => Some(*height),
            Self::Opaque(_) => None,
        }
    }
}

impl fmt::Display for QualityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(height) => write!(f, "{}p", height),
            Self::Opaque(name) => f.write_str(name),
        }
    }
}

/// One variant stream of a master playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub key: QualityKey,
    pub url: String,
}

/// Variant streams keyed by quality, unique per key, in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityMap {
    entries: Vec<StreamDescriptor>,
}

impl QualityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a stream. A repeated key keeps its original position and takes the new URL.
    pub fn insert(&mut self, key: QualityKey, url: String) {
        match self.entries.iter_mut().find(|entry| entry.key == key) {
            Some(existing) => existing.url = url,
            None => self.entries.push(StreamDescriptor { key, url }),
        }
    }

    pub fn get(&self, key: &QualityKey) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| &entry.key == key)
            .map(|entry| entry.url.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &QualityKey> {
        self.entries.iter().map(|entry| &entry.key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `#EXT-X-KEY` attributes of a media playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub method: String,
    pub key_url: Option<String>,
    pub iv: Option<String>,
}

impl EncryptionInfo {
    pub fn is_aes128(&self) -> bool {
        self.method.eq_ignore_ascii_case("AES-128")
    }
}

fn resolution_regex() -> &'static Regex {
    static RESOLUTION: OnceLock<Regex> = OnceLock::new();
    RESOLUTION.get_or_init(|| {
        Regex::new(r"RESOLUTION=\d+x(\d+)").expect("resolution pattern is valid")
    })
}

/// Substring check for the stream-info tag
pub fn is_master_playlist(content: &str) -> bool {
    content.contains(STREAM_INF_TAG)
}

/// Parse a master playlist into a quality map.
///
/// Each stream-info line is paired with the next non-empty line. Streams
/// without a `RESOLUTION=WxH` attribute get an opaque `stream_<line>` key.
pub fn parse_master(content: &str, base_url: &Url) -> QualityMap {
    let lines: Vec<&str> = content.lines().collect();
    let mut qualities = QualityMap::new();

    for (i, line) in lines.iter().enumerate() {
        if !line.trim_start().starts_with(STREAM_INF_TAG) {
            continue;
        }

        let Some(uri) = lines[i + 1..]
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
        else {
            tracing::debug!("Stream-info on line {} has no URI", i);
            continue;
        };
        if uri.starts_with('#') {
            tracing::debug!("Stream-info on line {} followed by tag {}", i, uri);
            continue;
        }

        let Some(url) = resolve_url(base_url, uri) else {
            continue;
        };

        let height = resolution_regex()
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok());

        let key = match height {
            Some(height) => QualityKey::Numeric(height),
            None => QualityKey::Opaque(format!("stream_{}", i)),
        };
        qualities.insert(key, url);
    }

    qualities
}

/// Parse a media playlist into its ordered segment URLs.
///
/// Blank lines and `#` lines are skipped, everything else is a segment.
/// Duplicates are kept positionally.
pub fn parse_media(content: &str, base_url: &Url) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| resolve_url(base_url, line))
        .collect()
}

/// `#EXT-X-MEDIA-SEQUENCE` value, 0 when absent
pub fn parse_media_sequence(content: &str) -> u64 {
    content
        .lines()
        .find_map(|line| line.trim().strip_prefix(MEDIA_SEQUENCE_TAG))
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

/// First `#EXT-X-KEY` of the playlist, `None` when absent or `METHOD=NONE`
pub fn parse_encryption(content: &str, base_url: &Url) -> Option<EncryptionInfo> {
    let attributes = content
        .lines()
        .find_map(|line| line.trim().strip_prefix(KEY_TAG))?;

    let mut method = String::new();
    let mut key_url = None;
    let mut iv = None;

    for (name, value) in split_attributes(attributes) {
        match name {
            "METHOD" => method = value.to_string(),
            "URI" => key_url = resolve_url(base_url, value),
            "IV" => iv = Some(value.to_string()),
            _ => {}
        }
    }

    if method.is_empty() || method.eq_ignore_ascii_case("NONE") {
        return None;
    }

    Some(EncryptionInfo {
        method,
        key_url,
        iv,
    })
}

/// Split `A=1,B="x,y"` into name/value pairs, honouring quoted commas
fn split_attributes(attributes: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (pos, ch) in attributes.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                pairs.push(&attributes[start..pos]);
                start = pos + 1;
            }
            _ => {}
        }
    }
    pairs.push(&attributes[start..]);

    pairs
        .into_iter()
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim(), value.trim().trim_matches('"')))
        .collect()
}

/// Resolve a playlist entry against its base URL; absolute http(s) entries pass through.
pub fn resolve_url(base_url: &Url, entry: &str) -> Option<String> {
    if entry.starts_with("http://") || entry.starts_with("https://") {
        return Some(entry.to_string());
    }

    match base_url.join(entry) {
        Ok(resolved) => Some(resolved.to_string()),
        Err(e) => {
            tracing::warn!("Failed to resolve {} against {}: {}", entry, base_url, e);
            None
        }
    }
}

//! HTTP transport shared by playlist and segment fetches
//!
//! The client is built once from a [`ClientConfig`] and never mutated
//! afterwards; headers and proxy are fixed at construction.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::core::error_handling::{FetchFailure, HlsError, HlsResult};
use crate::core::segment_fetcher::CancelHandle;

/// What a request is for; selects the timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Playlist,
    Segment,
    Key,
}

/// Source of remote bytes. Implemented by [`HttpClient`] and by test fakes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, kind: RequestKind) -> Result<Bytes, FetchFailure>;
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 用户代理
    pub user_agent: String,
    /// Extra headers, applied over the defaults
    pub headers: BTreeMap<String, String>,
    /// Proxy used for every scheme
    pub proxy: Option<String>,
    /// 播放列表请求超时（秒）
    pub playlist_timeout_secs: u64,
    /// 片段请求超时（秒）
    pub segment_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string(),
            headers: BTreeMap::new(),
            proxy: None,
            playlist_timeout_secs: 10,
            segment_timeout_secs: 20,
        }
    }
}

impl ClientConfig {
    fn default_headers() -> [(&'static str, &'static str); 4] {
        [
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
            ("Accept-Language", "en-US,en;q=0.9"),
            ("Connection", "keep-alive"),
            ("Referer", "https://www.google.com/"),
        ]
    }

    /// Defaults merged with the configured headers
    pub fn header_map(&self) -> HlsResult<HeaderMap> {
        let mut map = HeaderMap::new();
        let configured = self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()));

        for (name, value) in Self::default_headers().into_iter().chain(configured) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HlsError::Config(format!("invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| HlsError::Config(format!("invalid value for {}: {}", name, e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    pub fn timeout_for(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Playlist | RequestKind::Key => {
                Duration::from_secs(self.playlist_timeout_secs)
            }
            RequestKind::Segment => Duration::from_secs(self.segment_timeout_secs),
        }
    }
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: ClientConfig,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> HlsResult<Self> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(config.header_map()?);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| HlsError::Config(format!("invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| HlsError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stream a response body to disk, reporting cumulative bytes.
    ///
    /// Returns the number of bytes written. No timeout applies to the body;
    /// `cancel` is checked between chunks and yields `Interrupted`.
    pub async fn stream_to_file<F>(
        &self,
        url: &str,
        output_path: &Path,
        cancel: &CancelHandle,
        mut on_chunk: F,
    ) -> HlsResult<u64>
    where
        F: FnMut(u64, Option<u64>),
    {
        if cancel.is_cancelled() {
            return Err(HlsError::Interrupted);
        }
        let response = self.client.get(url).send().await.map_err(|e| HlsError::Request {
            url: url.to_string(),
            failure: FetchFailure::transport(e),
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(HlsError::PermissionDenied {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(HlsError::Request {
                url: url.to_string(),
                failure: FetchFailure::Status(status.as_u16()),
            });
        }

        let total = response.content_length();
        let mut file = File::create(output_path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(HlsError::Interrupted);
            }
            let chunk = chunk.map_err(|e| HlsError::Request {
                url: url.to_string(),
                failure: FetchFailure::transport(e),
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_chunk(written, total);
        }

        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn get(&self, url: &str, kind: RequestKind) -> Result<Bytes, FetchFailure> {
        let response = self
            .client
            .get(url)
            .timeout(self.config.timeout_for(kind))
            .send()
            .await
            .map_err(FetchFailure::transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }

        response.bytes().await.map_err(FetchFailure::transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_headers_override_defaults() {
        let mut config = ClientConfig::default();
        config
            .headers
            .insert("Referer".to_string(), "https://site.example/".to_string());
        config
            .headers
            .insert("X-Token".to_string(), "abc".to_string());

        let headers = config.header_map().unwrap();
        assert_eq!(headers.get("referer").unwrap(), "https://site.example/");
        assert_eq!(headers.get("x-token").unwrap(), "abc");
        assert_eq!(headers.get("accept-language").unwrap(), "en-US,en;q=0.9");
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        let mut config = ClientConfig::default();
        config
            .headers
            .insert("bad header".to_string(), "x".to_string());
        assert!(matches!(config.header_map(), Err(HlsError::Config(_))));
    }

    #[test]
    fn test_timeouts_by_request_kind() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout_for(RequestKind::Playlist), Duration::from_secs(10));
        assert_eq!(config.timeout_for(RequestKind::Segment), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_client_builds_with_proxy() {
        let config = ClientConfig {
            proxy: Some("http://127.0.0.1:8080".to_string()),
            ..ClientConfig::default()
        };
        assert!(HttpClient::new(config).is_ok());
    }
}

// src/core/origin.rs

//! The upstream transform provider: given a source path and parameters it
//! returns transformed bytes. The cache treats it as an opaque, possibly slow,
//! possibly failing dependency.

use crate::config::OriginConfig;
use crate::core::cache::key::TransformParams;
use crate::core::cache::metadata::SourceType;
use crate::core::errors::PixelCacheError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use std::time::Duration;
use tracing::debug;

/// Header an origin may use to report the size of the untransformed source.
pub const ORIGINAL_SIZE_HEADER: &str = "x-original-size";

/// What the provider produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedImage {
    pub body: Bytes,
    pub content_type: String,
    pub status: u16,
    /// Freshness lifetime announced by the origin, in seconds.
    pub ttl_hint: Option<u64>,
    /// The origin forbids storing this response.
    pub no_store: bool,
    pub original_size: Option<i64>,
    pub source_type: SourceType,
}

#[async_trait]
pub trait OriginTransformProvider: Send + Sync + Debug {
    async fn transform(
        &self,
        source_path: &str,
        params: &TransformParams,
    ) -> Result<TransformedImage, PixelCacheError>;
}

/// The parts of a `Cache-Control` value the cache acts on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// Shared-cache lifetime. `s-maxage` wins over `max-age`; `no-cache` means zero.
    pub ttl_hint: Option<u64>,
    pub no_store: bool,
}

pub fn parse_cache_control(header_value: &str) -> CacheControl {
    let mut max_age = None;
    let mut s_maxage = None;
    let mut no_cache = false;
    let mut no_store = false;
    for directive in header_value.split(',') {
        let directive = directive.trim();
        if directive.eq_ignore_ascii_case("no-store") {
            no_store = true;
            continue;
        }
        if directive.eq_ignore_ascii_case("no-cache") {
            no_cache = true;
            continue;
        }
        let Some((name, value)) = directive.split_once('=') else {
            continue;
        };
        let Ok(seconds) = value.trim().trim_matches('"').parse::<u64>() else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("s-maxage") {
            s_maxage = Some(seconds);
        } else if name.trim().eq_ignore_ascii_case("max-age") {
            max_age = Some(seconds);
        }
    }
    CacheControl {
        ttl_hint: if no_cache { Some(0) } else { s_maxage.or(max_age) },
        no_store,
    }
}

/// Calls an HTTP transform service at `{base_url}{path}?{params}`.
#[derive(Debug, Clone)]
pub struct HttpOriginProvider {
    client: reqwest::Client,
    base_url: String,
    ignored_params: Vec<String>,
}

impl HttpOriginProvider {
    pub fn new(config: &OriginConfig, ignored_params: Vec<String>) -> Result<Self, PixelCacheError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ignored_params,
        })
    }

    fn request_url(&self, source_path: &str, params: &TransformParams) -> String {
        let path = if source_path.starts_with('/') {
            source_path.to_string()
        } else {
            format!("/{source_path}")
        };
        let query = params.to_query_string(&self.ignored_params);
        if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        }
    }
}

#[async_trait]
impl OriginTransformProvider for HttpOriginProvider {
    async fn transform(
        &self,
        source_path: &str,
        params: &TransformParams,
    ) -> Result<TransformedImage, PixelCacheError> {
        let url = self.request_url(source_path, params);
        debug!(url = %url, "Requesting transform from origin.");

        let res = self.client.get(&url).send().await?;
        let status = res.status().as_u16();
        let headers = res.headers();

        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let cache_control = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(parse_cache_control)
            .unwrap_or_default();
        let original_size = headers
            .get(ORIGINAL_SIZE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());

        if res.status().is_server_error() {
            return Err(PixelCacheError::OriginTransformFailure(format!(
                "origin answered {status} for {url}"
            )));
        }

        let body = res.bytes().await?;
        Ok(TransformedImage {
            body,
            content_type,
            status,
            ttl_hint: cache_control.ttl_hint,
            no_store: cache_control.no_store,
            original_size,
            source_type: SourceType::RemoteHttp,
        })
    }
}

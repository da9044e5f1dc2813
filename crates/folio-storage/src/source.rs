//! Access to the hosted source project: PostgREST table reads and object storage.

use anyhow::Context;
use async_trait::async_trait;
use folio_core::{Record, SourceConfig};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

use crate::retry::{RetryDisposition, Retryable};

/// An entry returned by a bucket listing. Folders come back with a null `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageObject {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

impl StorageObject {
    pub fn is_folder(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl Retryable for SourceError {
    fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Request { source, .. } => classify_reqwest_error(source),
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            Self::Decode { .. } => RetryDisposition::NonRetryable,
            Self::Unavailable(_) => RetryDisposition::Retryable,
        }
    }
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Raw, single-attempt calls against the source. Callers wrap them in retries.
#[async_trait]
pub trait SourceBackend: Send + Sync {
    /// Identifier recorded in the export manifest.
    fn endpoint(&self) -> &str;

    async fn ping(&self) -> Result<(), SourceError>;

    async fn count_rows(&self, table: &str) -> Result<u64, SourceError>;

    async fn fetch_page(&self, table: &str, offset: u64, limit: u64)
        -> Result<Vec<Record>, SourceError>;

    async fn sample_ids(&self, table: &str, limit: u64) -> Result<Vec<JsonValue>, SourceError>;

    async fn list_objects(
        &self,
        bucket: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<StorageObject>, SourceError>;

    async fn download_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, SourceError>;
}

/// Extracts the total from a PostgREST `Content-Range` header such as `0-24/3573` or `*/0`.
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    let (_, total) = header.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

#[derive(Debug)]
pub struct SupabaseSource {
    client: reqwest::Client,
    base: Url,
    endpoint: String,
}

impl SupabaseSource {
    pub fn new(config: &SourceConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.service_key).context("service key is not a valid header value")?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.service_key))
            .context("service key is not a valid header value")?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.http_timeout)
            .user_agent(concat!("folio-migrate/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .context("building reqwest client")?;
        let base = Url::parse(&config.url).with_context(|| format!("parsing SUPABASE_URL {}", config.url))?;

        Ok(Self {
            client,
            base,
            endpoint: config.url.clone(),
        })
    }

    fn url_for<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, SourceError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Decode {
                url: self.endpoint.clone(),
                reason: "source URL cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn table_url(&self, table: &str) -> Result<Url, SourceError> {
        self.url_for(["rest", "v1", table])
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &Url) -> Result<reqwest::Response, SourceError> {
        let resp = request.send().await.map_err(|source| SourceError::Request {
            url: url.to_string(),
            source,
        })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(512)
            .collect();
        Err(SourceError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        })
    }

    async fn json_body<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
        url: &Url,
    ) -> Result<T, SourceError> {
        let bytes = resp.bytes().await.map_err(|source| SourceError::Request {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl SourceBackend for SupabaseSource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn ping(&self) -> Result<(), SourceError> {
        let url = self.url_for(["rest", "v1", ""])?;
        self.send(self.client.get(url.clone()), &url).await?;
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<u64, SourceError> {
        let url = self.table_url(table)?;
        let request = self
            .client
            .head(url.clone())
            .query(&[("select", "*")])
            .header("Prefer", "count=exact");
        let resp = self.send(request, &url).await?;
        let header = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SourceError::Decode {
                url: url.to_string(),
                reason: "missing Content-Range header".to_string(),
            })?;
        parse_content_range_total(header).ok_or_else(|| SourceError::Decode {
            url: url.to_string(),
            reason: format!("unparseable Content-Range {header:?}"),
        })
    }

    async fn fetch_page(
        &self,
        table: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Record>, SourceError> {
        let url = self.table_url(table)?;
        let request = self.client.get(url.clone()).query(&[
            ("select", "*".to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]);
        let resp = self.send(request, &url).await?;
        Self::json_body(resp, &url).await
    }

    async fn sample_ids(&self, table: &str, limit: u64) -> Result<Vec<JsonValue>, SourceError> {
        let url = self.table_url(table)?;
        let request = self.client.get(url.clone()).query(&[
            ("select", "id".to_string()),
            ("order", "id.asc".to_string()),
            ("limit", limit.to_string()),
        ]);
        let resp = self.send(request, &url).await?;
        let rows: Vec<Record> = Self::json_body(resp, &url).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.remove("id"))
            .filter(|id| !id.is_null())
            .collect())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<StorageObject>, SourceError> {
        let url = self.url_for(["storage", "v1", "object", "list", bucket])?;
        let request = self.client.post(url.clone()).json(&json!({
            "prefix": "",
            "limit": limit,
            "offset": offset,
            "sortBy": { "column": "name", "order": "asc" },
        }));
        let resp = self.send(request, &url).await?;
        Self::json_body(resp, &url).await
    }

    async fn download_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, SourceError> {
        let segments = ["storage", "v1", "object", bucket]
            .into_iter()
            .chain(name.split('/').filter(|s| !s.is_empty()));
        let url = self.url_for(segments)?;
        let resp = self.send(self.client.get(url.clone()), &url).await?;
        let bytes = resp.bytes().await.map_err(|source| SourceError::Request {
            url: url.to_string(),
            source,
        })?;
        Ok(bytes.to_vec())
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use common::config::ApiConfig;
use common::{Error, Result};
use futures::Stream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::models::{ApiMetadata, Filters, Page};
use crate::utils::retry::{is_transient, retry_with_backoff, Attempt, RetryPolicy};

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub enum TransportError {
    Timeout(String),
    Network(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout(msg) => write!(f, "timeout: {}", msg),
            TransportError::Network(msg) => write!(f, "network error: {}", msg),
        }
    }
}

/// One HTTP GET. Implementations must bound every call with a timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> std::result::Result<TransportResponse, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| Error::InvalidInput(format!("Invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidInput(format!("Invalid value for header '{}': {}", key, e)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> std::result::Result<TransportResponse, TransportError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else {
                TransportError::Network(e.to_string())
            }
        };

        let response = self.client.get(url.clone()).send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;
        Ok(TransportResponse { status, body })
    }
}

/// Client for the brewery catalogue API.
pub struct BreweryApiClient<T: Transport = HttpTransport> {
    transport: T,
    base_url: Url,
    per_page: u32,
    retry: RetryPolicy,
    page_delay: Duration,
    max_pages: u32,
}

impl BreweryApiClient<HttpTransport> {
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(HttpTransport::new(config)?, config)
    }
}

impl<T: Transport> BreweryApiClient<T> {
    pub fn new(transport: T, config: &ApiConfig) -> Result<Self> {
        if config.per_page == 0 {
            return Err(Error::InvalidInput("per_page must be positive".to_string()));
        }
        Ok(Self {
            transport,
            base_url: Url::parse(&config.base_url)?,
            per_page: config.per_page,
            retry: RetryPolicy::from_config(config),
            page_delay: Duration::from_millis(config.page_delay_ms),
            max_pages: config.max_pages,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn source(&self) -> String {
        self.base_url.to_string()
    }

    fn endpoint(&self, segments: &[&str], query: &[(&str, String)], filters: &Filters) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput(format!("Base URL cannot take a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);

        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            for (key, value) in filters {
                pairs.append_pair(key, value);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    /// GET with retries. Transient statuses and transport errors are retried;
    /// any other status outside 2xx and `accepted` fails at once.
    async fn send(&self, url: &Url, accepted: &[u16]) -> Result<TransportResponse> {
        retry_with_backoff(&self.retry, move |attempt| async move {
            debug!(%url, attempt, "GET");
            match self.transport.get(url).await {
                Ok(response) if is_transient(response.status) => Attempt::Retryable {
                    status: Some(response.status),
                    cause: format!("HTTP {} from {}", response.status, url),
                },
                Ok(response)
                    if (200..300).contains(&response.status) || accepted.contains(&response.status) =>
                {
                    Attempt::Done(response)
                }
                Ok(response) => Attempt::Fatal(Error::fetch(
                    Some(response.status),
                    format!("HTTP {} from {}", response.status, url),
                )),
                Err(e) => Attempt::Retryable {
                    status: None,
                    cause: format!("{} ({})", e, url),
                },
            }
        })
        .await
    }

    fn parse_body(url: &Url, response: &TransportResponse) -> Result<Value> {
        serde_json::from_slice(&response.body).map_err(|e| {
            Error::fetch(
                Some(response.status),
                format!("malformed JSON from {}: {}", url, e),
            )
        })
    }

    async fn get_json(&self, url: &Url) -> Result<Value> {
        let response = self.send(url, &[]).await?;
        Self::parse_body(url, &response)
    }

    pub async fn try_fetch_metadata(&self, filters: &Filters) -> Result<ApiMetadata> {
        let url = self.endpoint(&["breweries", "meta"], &[], filters)?;
        let body = self.get_json(&url).await?;
        Ok(ApiMetadata::from_json(&body))
    }

    /// Never fails: any error is logged and the total becomes unknown.
    pub async fn fetch_metadata(&self, filters: &Filters) -> ApiMetadata {
        match self.try_fetch_metadata(filters).await {
            Ok(metadata) => {
                info!(total = ?metadata.total, "Fetched API metadata");
                metadata
            }
            Err(e) => {
                warn!(error = %e, "Could not fetch API metadata; expected total is unknown");
                ApiMetadata::unknown()
            }
        }
    }

    pub async fn fetch_page(&self, page: u32, filters: &Filters) -> Result<Page> {
        let url = self.endpoint(
            &["breweries"],
            &[("page", page.to_string()), ("per_page", self.per_page.to_string())],
            filters,
        )?;

        match self.get_json(&url).await? {
            Value::Array(records) => {
                debug!(page, records = records.len(), "Fetched page");
                Ok(Page::new(page, records))
            }
            other => Err(Error::fetch(
                Some(200),
                format!(
                    "expected a JSON array for page {}, got {}",
                    page,
                    json_kind(&other)
                ),
            )),
        }
    }

    /// Single record by id; `None` when the API answers 404.
    pub async fn fetch_by_id(&self, id: &str) -> Result<Option<Value>> {
        let url = self.endpoint(&["breweries", id], &[], &Filters::new())?;
        let response = self.send(&url, &[404]).await?;
        if response.status == 404 {
            debug!(id, "Record not found");
            return Ok(None);
        }
        Self::parse_body(&url, &response).map(Some)
    }

    /// Lazily yields pages starting at 1. Stops after a page shorter than
    /// `per_page`, or at an empty page, which is not yielded.
    pub fn fetch_all<'a>(&'a self, filters: &'a Filters) -> impl Stream<Item = Result<Page>> + 'a {
        futures::stream::try_unfold(Cursor::Next(1), move |cursor| self.advance(cursor, filters))
    }

    async fn advance(&self, cursor: Cursor, filters: &Filters) -> Result<Option<(Page, Cursor)>> {
        let number = match cursor {
            Cursor::Next(number) => number,
            Cursor::Finished => return Ok(None),
        };

        if number > self.max_pages {
            return Err(Error::fetch(
                None,
                format!(
                    "pagination did not terminate within max_pages={}",
                    self.max_pages
                ),
            ));
        }
        if number > 1 && !self.page_delay.is_zero() {
            sleep(self.page_delay).await;
        }

        let page = self.fetch_page(number, filters).await?;
        if page.is_empty() {
            info!(page = number, "Empty page, pagination complete");
            return Ok(None);
        }

        let next = if page.len() < self.per_page as usize {
            info!(page = number, records = page.len(), "Partial page, pagination complete");
            Cursor::Finished
        } else {
            Cursor::Next(number + 1)
        };
        Ok(Some((page, next)))
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Next(u32),
    Finished,
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

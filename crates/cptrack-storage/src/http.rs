//! Shared HTTP layer: one retry/backoff/timeout policy for every tier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use cptrack_core::{ErrorKind, ExtractError, Source};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::pace::sleep_or_cancel;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const GRAPHQL_TIMEOUT: Duration = Duration::from_secs(30);
pub const BROWSER_CLASS_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const BOT_MARKERS: &[&str] = &[
    "captcha",
    "cf-chl",
    "cloudflare",
    "access denied",
    "are you a robot",
    "unusual traffic",
];
const SNIPPET_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    RateLimited,
    NotFound,
    BotDetected,
    NonRetryable,
}

/// Classifies a non-success response. GitHub signals an exhausted quota with
/// 403 and `X-RateLimit-Remaining: 0`.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> RetryDisposition {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return RetryDisposition::RateLimited;
    }
    if status == StatusCode::NOT_FOUND {
        return RetryDisposition::NotFound;
    }
    if status == StatusCode::FORBIDDEN {
        if header_str(headers, "x-ratelimit-remaining") == Some("0") {
            return RetryDisposition::RateLimited;
        }
        let lower = body.to_ascii_lowercase();
        if headers.contains_key("cf-mitigated") || BOT_MARKERS.iter().any(|m| lower.contains(m)) {
            return RetryDisposition::BotDetected;
        }
        return RetryDisposition::NonRetryable;
    }
    if status.is_server_error() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Server-provided wait: `Retry-After` seconds, else `X-RateLimit-Reset` epoch.
pub fn rate_limit_hint(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = header_str(headers, "retry-after").and_then(|v| v.parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    let reset = header_str(headers, "x-ratelimit-reset")?.parse::<i64>().ok()?;
    let wait = reset - Utc::now().timestamp();
    Some(Duration::from_secs(wait.max(0) as u64))
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Transient I/O and 5xx: three attempts in total.
    pub fn transient() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }

    /// 429: `2^attempt · 5 s`, hinted waits honored up to 300 s.
    pub fn rate_limited() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub transient: BackoffPolicy,
    pub rate_limit: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: Some(BROWSER_CLASS_USER_AGENT.to_string()),
            global_concurrency: 8,
            per_source_concurrency: 1,
            transient: BackoffPolicy::transient(),
            rate_limit: BackoffPolicy::rate_limited(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub source: Source,
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub json: Option<JsonValue>,
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn get(source: Source, url: impl Into<String>) -> Self {
        Self {
            source,
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            json: None,
            timeout: None,
        }
    }

    pub fn post_json(source: Source, url: impl Into<String>, body: JsonValue) -> Self {
        Self {
            method: Method::Post,
            json: Some(body),
            ..Self::get(source, url)
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    /// Decoded with the declared charset; undecodable bytes become U+FFFD.
    pub body: String,
}

impl FetchedResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_str(&self.body).map_err(|err| FetchError::Decode {
            url: self.final_url.clone(),
            message: err.to_string(),
        })
    }

    /// File extension for captured copies of this body.
    pub fn extension(&self) -> &'static str {
        match self.content_type.as_deref() {
            Some(ct) if ct.contains("json") => "json",
            Some(ct) if ct.contains("html") => "html",
            _ => "txt",
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed after {attempts} attempts: {message}")]
    Request {
        url: String,
        attempts: usize,
        message: String,
    },
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("not found: {url}")]
    NotFound { url: String },
    #[error("bot detection triggered by {url}")]
    BotDetected { url: String },
    #[error("rate limited by {url} after {attempts} attempts")]
    RateLimited { url: String, attempts: usize },
    #[error("undecodable body from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Request { .. } => ErrorKind::TransientNetwork,
            FetchError::HttpStatus { status, .. } if *status >= 500 => ErrorKind::TransientNetwork,
            FetchError::HttpStatus { .. } | FetchError::Decode { .. } => ErrorKind::SchemaError,
            FetchError::NotFound { .. } => ErrorKind::UserNotFound,
            FetchError::BotDetected { .. } | FetchError::RateLimited { .. } => ErrorKind::RateLimited,
            FetchError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn into_extract_error(self, platform: Source, handle: &str) -> ExtractError {
        match self {
            FetchError::NotFound { .. } => ExtractError::not_found(platform, handle),
            FetchError::RateLimited { url, attempts } => ExtractError::RateLimited { url, attempts },
            FetchError::BotDetected { url } => ExtractError::RateLimited { url, attempts: 1 },
            FetchError::Cancelled => ExtractError::Cancelled,
            other if other.kind() == ErrorKind::TransientNetwork => {
                ExtractError::TransientNetwork(other.to_string())
            }
            other => ExtractError::Schema(other.to_string()),
        }
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(SNIPPET_LEN).collect()
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<Source, Arc<Semaphore>>>,
    transient: BackoffPolicy,
    rate_limit: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            transient: config.transient,
            rate_limit: config.rate_limit,
        })
    }

    async fn per_source_semaphore(&self, source: Source) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source)
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    fn build(&self, request: &FetchRequest) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }

    pub async fn fetch(
        &self,
        run_id: Uuid,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Cancelled)?;
        let per_source = self.per_source_semaphore(request.source).await;
        let _source = per_source.acquire().await.map_err(|_| FetchError::Cancelled)?;

        let span = info_span!("http_fetch", %run_id, source = %request.source, url = %request.url);
        self.fetch_with_retries(request, cancel).instrument(span).await
    }

    async fn fetch_with_retries(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchedResponse, FetchError> {
        let mut transient_failures = 0usize;
        let mut rate_limit_failures = 0usize;

        loop {
            let attempts = transient_failures + rate_limit_failures + 1;
            let sent = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                sent = self.build(request).send() => sent,
            };

            let resp = match sent {
                Ok(resp) => resp,
                Err(err) => {
                    let retry = classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && transient_failures < self.transient.max_retries;
                    if !retry {
                        return Err(FetchError::Request {
                            url: request.url.clone(),
                            attempts,
                            message: err.to_string(),
                        });
                    }
                    transient_failures += 1;
                    warn!(error = %err, attempt = attempts, "transient request error, retrying");
                    sleep_or_cancel(self.transient.delay_for_attempt(transient_failures), cancel)
                        .await
                        .map_err(|_| FetchError::Cancelled)?;
                    continue;
                }
            };

            let status = resp.status();
            let final_url = resp.url().to_string();
            let headers = resp.headers().clone();
            let content_type = header_str(&headers, "content-type").map(str::to_string);
            let body = match resp.text().await {
                Ok(body) => body,
                Err(err) if status.is_success() => {
                    return Err(FetchError::Request {
                        url: final_url,
                        attempts,
                        message: err.to_string(),
                    })
                }
                Err(_) => String::new(),
            };

            if status.is_success() {
                return Ok(FetchedResponse {
                    status: status.as_u16(),
                    final_url,
                    content_type,
                    body,
                });
            }

            match classify_status(status, &headers, &body) {
                RetryDisposition::RateLimited => {
                    if rate_limit_failures >= self.rate_limit.max_retries {
                        return Err(FetchError::RateLimited {
                            url: final_url,
                            attempts,
                        });
                    }
                    rate_limit_failures += 1;
                    let wait = rate_limit_hint(&headers)
                        .map(|hint| hint.min(self.rate_limit.max_delay))
                        .unwrap_or_else(|| self.rate_limit.delay_for_attempt(rate_limit_failures));
                    warn!(status = status.as_u16(), wait_secs = wait.as_secs_f64(), "rate limited, backing off");
                    sleep_or_cancel(wait, cancel)
                        .await
                        .map_err(|_| FetchError::Cancelled)?;
                }
                RetryDisposition::Retryable if transient_failures < self.transient.max_retries => {
                    transient_failures += 1;
                    warn!(status = status.as_u16(), attempt = attempts, "server error, retrying");
                    sleep_or_cancel(self.transient.delay_for_attempt(transient_failures), cancel)
                        .await
                        .map_err(|_| FetchError::Cancelled)?;
                }
                RetryDisposition::NotFound => return Err(FetchError::NotFound { url: final_url }),
                RetryDisposition::BotDetected => return Err(FetchError::BotDetected { url: final_url }),
                _ => {
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                        body: snippet(&body),
                    })
                }
            }
        }
    }

    pub async fn get_text(
        &self,
        run_id: Uuid,
        source: Source,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedResponse, FetchError> {
        self.fetch(run_id, &FetchRequest::get(source, url), cancel).await
    }
}

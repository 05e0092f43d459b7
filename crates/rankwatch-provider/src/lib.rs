//! SERP provider client: bulk ranking + search-volume calls with bounded
//! retry, exponential backoff, and pluggable rate limiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rankwatch_core::{KeywordResults, SearchVolume};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

pub mod limit;

pub use limit::{RateLimiter, TokenBucket};

pub const CRATE_NAME: &str = "rankwatch-provider";

/// One keyword entry in a bulk ranking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankRequest {
    pub keyword: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("empty request: at least one keyword is required")]
    EmptyRequest,
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("provider task failed with code {code}: {message}")]
    Task { code: u32, message: String },
    #[error("decoding provider response: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Contract for the external SERP data provider.
///
/// Response order is not guaranteed to match request order; callers match
/// result sets to requests by the `keyword` field.
#[async_trait]
pub trait RankProvider: Send + Sync {
    async fn fetch_rankings(
        &self,
        requests: &[RankRequest],
        location: &str,
        language: &str,
    ) -> Result<Vec<KeywordResults>, ProviderError>;

    async fn fetch_search_volume(
        &self,
        keywords: &[String],
        location: &str,
        language: &str,
    ) -> Result<Vec<SearchVolume>, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
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

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub login: String,
    pub password: String,
    pub depth: u32,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.dataforseo.com".to_string(),
            login: String::new(),
            password: String::new(),
            depth: 100,
            timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SerpTaskRequest<'a> {
    keyword: &'a str,
    location_name: &'a str,
    language_code: &'a str,
    depth: u32,
}

#[derive(Debug, Serialize)]
struct VolumeTaskRequest<'a> {
    keywords: &'a [String],
    location_name: &'a str,
    language_code: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status_code: u32,
    #[serde(default)]
    status_message: String,
    #[serde(default = "Vec::new")]
    tasks: Vec<ApiTask<T>>,
}

#[derive(Debug, Deserialize)]
struct ApiTask<T> {
    status_code: u32,
    #[serde(default)]
    status_message: String,
    #[serde(default = "Vec::new")]
    result: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct VolumeResult {
    #[serde(default = "Vec::new")]
    items: Vec<SearchVolume>,
}

const TASK_OK: u32 = 20000;

// ── HTTP implementation ──────────────────────────────────────────────────────

/// Live client against a DataForSEO-shaped bulk SERP API.
pub struct HttpRankProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    limiter: Option<Arc<dyn RateLimiter>>,
}

impl HttpRankProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            limiter: None,
        })
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// POST `body` to `path`, retrying retryable failures with backoff.
    /// Returns the raw response body on 2xx.
    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<u8>, ProviderError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let backoff = self.config.backoff;
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=backoff.max_retries {
            let resp_result = self
                .client
                .post(&url)
                .basic_auth(&self.config.login, Some(&self.config.password))
                .json(body)
                .send()
                .await;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.bytes().await?.to_vec());
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < backoff.max_retries
                    {
                        warn!(%url, status = status.as_u16(), attempt, "retrying provider call");
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(ProviderError::HttpStatus {
                        status: status.as_u16(),
                        url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < backoff.max_retries
                    {
                        warn!(%url, error = %err, attempt, "retrying provider call");
                        last_request_error = Some(err);
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(ProviderError::Request(err));
                }
            }
        }

        Err(ProviderError::Request(
            last_request_error.expect("retry loop captures a request error"),
        ))
    }
}

fn collect_task_results<T>(response: ApiResponse<T>) -> Result<Vec<T>, ProviderError> {
    if response.status_code != TASK_OK {
        return Err(ProviderError::Task {
            code: response.status_code,
            message: response.status_message,
        });
    }

    let mut out = Vec::new();
    for task in response.tasks {
        if task.status_code != TASK_OK {
            return Err(ProviderError::Task {
                code: task.status_code,
                message: task.status_message,
            });
        }
        out.extend(task.result);
    }
    Ok(out)
}

#[async_trait]
impl RankProvider for HttpRankProvider {
    async fn fetch_rankings(
        &self,
        requests: &[RankRequest],
        location: &str,
        language: &str,
    ) -> Result<Vec<KeywordResults>, ProviderError> {
        if requests.is_empty() {
            return Err(ProviderError::EmptyRequest);
        }

        let tasks: Vec<SerpTaskRequest<'_>> = requests
            .iter()
            .map(|r| SerpTaskRequest {
                keyword: &r.keyword,
                location_name: location,
                language_code: language,
                depth: self.config.depth,
            })
            .collect();
        let body = serde_json::to_value(&tasks).map_err(ProviderError::Decode)?;

        let span = info_span!("fetch_rankings", keywords = requests.len(), location, language);
        async {
            let bytes = self
                .post_with_retry("/v3/serp/google/organic/live/advanced", &body)
                .await?;
            let response: ApiResponse<KeywordResults> =
                serde_json::from_slice(&bytes).map_err(ProviderError::Decode)?;
            collect_task_results(response)
        }
        .instrument(span)
        .await
    }

    async fn fetch_search_volume(
        &self,
        keywords: &[String],
        location: &str,
        language: &str,
    ) -> Result<Vec<SearchVolume>, ProviderError> {
        if keywords.is_empty() {
            return Err(ProviderError::EmptyRequest);
        }

        let tasks = vec![VolumeTaskRequest {
            keywords,
            location_name: location,
            language_code: language,
        }];
        let body = serde_json::to_value(&tasks).map_err(ProviderError::Decode)?;

        let span = info_span!("fetch_search_volume", keywords = keywords.len(), location, language);
        async {
            let bytes = self
                .post_with_retry("/v3/keywords_data/google_ads/search_volume/live", &body)
                .await?;
            let response: ApiResponse<VolumeResult> =
                serde_json::from_slice(&bytes).map_err(ProviderError::Decode)?;
            let results = collect_task_results(response)?;
            Ok(results.into_iter().flat_map(|r| r.items).collect())
        }
        .instrument(span)
        .await
    }
}

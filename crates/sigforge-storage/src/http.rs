use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// 408, 429 and every 5xx are transient; any other status is final.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RetryDisposition::Retryable,
        s if s.is_server_error() => RetryDisposition::Retryable,
        _ => RetryDisposition::NonRetryable,
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
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
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 16,
            per_source_concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Shared outbound HTTP client: bounded globally and per source, with retry on
/// transient failures.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("http fetcher is shutting down")]
    Closed,
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Request(err) if err.is_timeout())
    }
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
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    pub async fn get(
        &self,
        source_id: &str,
        url: &str,
        query: &[(String, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, method = "GET", url);
        self.send_with_retry(source_id, || self.client.get(url).query(query))
            .instrument(span)
            .await
    }

    pub async fn post_json(
        &self,
        source_id: &str,
        url: &str,
        body: &JsonValue,
    ) -> Result<FetchedResponse, FetchError> {
        // The url may embed a credential, so only the source is recorded.
        let span = info_span!("http_fetch", source_id, method = "POST");
        self.send_with_retry(source_id, || self.client.post(url).json(body))
            .instrument(span)
            .await
    }

    async fn send_with_retry<F>(&self, source_id: &str, build: F) -> Result<FetchedResponse, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let _global = self
            .global_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Closed)?;
        let per_source = self.per_source_semaphore(source_id).await;
        let _source = per_source
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Closed)?;

        let mut attempt = 0;
        loop {
            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        debug!(status = status.as_u16(), bytes = body.len(), "fetched");
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        warn!(status = status.as_u16(), attempt, "retrying after http status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        warn!(error = %err, attempt, "retrying after request error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // Answers each connection with the next canned status, then 200s.
    async fn scripted_server(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses.get(n).copied().unwrap_or(200);
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let body = if status == 200 { "ok" } else { "busy" };
                let response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}/"), hits)
    }

    fn fast_fetcher(max_retries: usize) -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            backoff: BackoffPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..HttpClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn telegram_style_backoff_doubles_to_its_cap() {
        let policy = BackoffPolicy {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        };
        let delays: Vec<_> = (0..4).map(|i| policy.delay_for_attempt(i).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 4]);
        assert_eq!(policy.delay_for_attempt(64), Duration::from_secs(4));
    }

    #[test]
    fn transient_statuses_retry_and_client_errors_do_not() {
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::REQUEST_TIMEOUT), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), RetryDisposition::NonRetryable);
    }

    #[tokio::test]
    async fn transient_status_is_retried_until_success() {
        let (url, hits) = scripted_server(vec![503, 502]).await;
        let fetched = fast_fetcher(3).get("test", &url, &[]).await.unwrap();
        assert_eq!(fetched.status, StatusCode::OK);
        assert_eq!(fetched.text(), "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn request_timeout_status_is_retried() {
        let (url, hits) = scripted_server(vec![408]).await;
        let fetched = fast_fetcher(2).get("test", &url, &[]).await.unwrap();
        assert_eq!(fetched.status, StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let (url, hits) = scripted_server(vec![503; 10]).await;
        let err = fast_fetcher(1).get("test", &url, &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_fail_without_retry() {
        let (url, hits) = scripted_server(vec![404]).await;
        let err = fast_fetcher(3)
            .post_json("test", &url, &serde_json::json!({"a": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
        assert!(!err.is_timeout());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

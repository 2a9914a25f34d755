//! Retrying HTTP client for the cognitive analysis services.
//!
//! Every outbound analysis call goes through [`ServiceClient::execute`], which
//! absorbs transport and status errors into the closed [`Outcome`] enum so the
//! orchestrator never sees raw `reqwest` errors.

use crate::config::{SERVICE_MAX_RETRIES, SERVICE_RETRY_DELAY_MS};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, warn};

/// Quota-exceeded text shown to the user verbatim
pub const QUOTA_EXCEEDED_MSG: &str =
    "I ran out of quota for processing images. Please try again later. Sorry.";
/// Generic failure text shown to the user verbatim
pub const GENERIC_FAILURE_MSG: &str = "Something went wrong. Please try again.";

/// Classification of one analysis call.
///
/// `NoResult` is a valid domain outcome (for example "no faces found"), not an
/// error: the service answered 200 with an empty or non-JSON body.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 200 with a JSON body
    Success(Value),
    /// 200 with an empty or non-JSON body
    NoResult,
    /// 403 from the service, reported verbatim, never retried
    QuotaExceeded,
    /// Exhausted 429 retries, non-200 status, or transport failure
    Failed,
}

impl Outcome {
    /// Static user-facing text for this outcome, if any.
    ///
    /// `Success` and `NoResult` carry no failure text; what the user sees for
    /// those is decided by the task pipeline.
    #[must_use]
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::Success(_) | Self::NoResult => None,
            Self::QuotaExceeded => Some(QUOTA_EXCEEDED_MSG),
            Self::Failed => Some(GENERIC_FAILURE_MSG),
        }
    }

    /// Whether this outcome represents a degraded service rather than
    /// "definitely nothing to show"
    #[must_use]
    pub fn is_service_error(&self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::Failed)
    }
}

/// HTTP client shared by all analysis calls
#[derive(Clone)]
pub struct ServiceClient {
    http: HttpClient,
    retry_delay: Duration,
    max_retries: u32,
}

impl Default for ServiceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceClient {
    /// Create a client with the standard retry policy
    #[must_use]
    pub fn new() -> Self {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| HttpClient::new());

        Self {
            http,
            retry_delay: Duration::from_millis(SERVICE_RETRY_DELAY_MS),
            max_retries: SERVICE_MAX_RETRIES,
        }
    }

    /// Override the retry delay (used by tests to avoid real sleeps)
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// The underlying HTTP client, for plain downloads and URL probing
    #[must_use]
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// POST a binary payload to an analysis endpoint and classify the result.
    ///
    /// - 200 + non-empty JSON body: [`Outcome::Success`]
    /// - 200 + empty or non-JSON body: [`Outcome::NoResult`]
    /// - 403: [`Outcome::QuotaExceeded`], no retry
    /// - 429: retried with a fixed delay up to the bounded count, then
    ///   [`Outcome::Failed`]
    /// - anything else: [`Outcome::Failed`], with the upstream diagnostic body
    ///   logged but never surfaced
    ///
    /// Total attempts are at most `1 + max_retries`.
    pub async fn execute(
        &self,
        url: &str,
        subscription_key: &str,
        payload: Bytes,
        params: &[(&str, &str)],
    ) -> Outcome {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let response = self
                .http
                .post(url)
                .header("Ocp-Apim-Subscription-Key", subscription_key)
                .header(CONTENT_TYPE, "application/octet-stream")
                .query(params)
                .body(payload.clone())
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    error!("Analysis request to {} failed: {}", url, e);
                    return Outcome::Failed;
                }
            };

            match response.status() {
                StatusCode::OK => return Self::classify_ok(response).await,
                StatusCode::FORBIDDEN => return Outcome::QuotaExceeded,
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt > self.max_retries {
                        warn!(
                            "Analysis request to {} rate-limited after {} attempts",
                            url, attempt
                        );
                        return Outcome::Failed;
                    }
                    tokio::time::sleep(self.retry_delay).await;
                }
                status => {
                    Self::log_upstream_error(url, status, response).await;
                    return Outcome::Failed;
                }
            }
        }
    }

    async fn classify_ok(response: reqwest::Response) -> Outcome {
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"));

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to read analysis response body: {}", e);
                return Outcome::Failed;
            }
        };

        if !is_json || body.is_empty() {
            return Outcome::NoResult;
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Outcome::Success(value),
            Err(_) => Outcome::NoResult,
        }
    }

    /// Log the diagnostic fields of a non-200/403/429 response.
    /// The services put details either in `message` or `error.message`.
    async fn log_upstream_error(url: &str, status: StatusCode, response: reqwest::Response) {
        let detail = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| {
                body.get("message")
                    .or_else(|| body.get("error").and_then(|e| e.get("message")))
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_default();

        error!("Error code: {}, Message: {}", status.as_u16(), detail);
    }
}

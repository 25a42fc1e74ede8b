//! Publishing the run summary

use std::sync::Mutex;
use std::time::Duration;

use feedline_core::{
    HttpError, RetryPolicy, block_on_with_timeout, http_client, parse_retry_after,
    retry_with_backoff,
};
use serde::Deserialize;

/// Destination for the formatted summary.
pub trait Publisher: Send + Sync {
    /// Publish `text`; returns a reference to the published item.
    fn publish(&self, text: &str) -> anyhow::Result<String>;
}

/// Writes the summary to the log. Keeps what it published.
#[derive(Debug, Default)]
pub struct LogPublisher {
    published: Mutex<Vec<String>>,
}

impl LogPublisher {
    pub fn published(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Publisher for LogPublisher {
    fn publish(&self, text: &str) -> anyhow::Result<String> {
        let mut published = self.published.lock().unwrap_or_else(|e| e.into_inner());
        published.push(text.to_string());
        log::info!("publish:\n{text}");
        Ok(format!("log:{}", published.len()))
    }
}

/// POSTs `{"text": ...}` as JSON to a webhook.
///
/// The reference is the `uri` (or `id`) field of the JSON response, or
/// the HTTP status when the body has neither.
pub struct WebhookPublisher {
    url: String,
    token: Option<String>,
    timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

impl WebhookPublisher {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            token,
            timeout,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn post_once(&self, text: &str) -> Result<(u16, String), HttpError> {
        let body = serde_json::json!({ "text": text });
        block_on_with_timeout(self.timeout, async {
            let mut request = http_client().post(&self.url).json(&body);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await.map_err(HttpError::from_reqwest)?;
            let status = response.status();
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.map_err(HttpError::from_reqwest)?;
            if !status.is_success() {
                return Err(HttpError::Status {
                    status: status.as_u16(),
                    message: text.chars().take(200).collect(),
                    retry_after,
                });
            }
            Ok((status.as_u16(), text))
        })
    }
}

fn reference_from(status: u16, body: &str) -> String {
    serde_json::from_str::<WebhookResponse>(body)
        .ok()
        .and_then(|r| r.uri.or(r.id))
        .unwrap_or_else(|| format!("http:{status}"))
}

impl Publisher for WebhookPublisher {
    fn publish(&self, text: &str) -> anyhow::Result<String> {
        let (status, body) = retry_with_backoff("publish", &self.retry, || self.post_once(text))
            .map_err(|e| anyhow::anyhow!("publish failed: {e}"))?;
        Ok(reference_from(status, &body))
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use common::manifest::{AttachmentRef, Locator};

use crate::config::HostApiConfig;

/// Longest rate-limit wait honoured before giving up
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum HostApiError {
    #[error("no host API token configured")]
    MissingToken,
    #[error("invalid host API base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("host API request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("host API returned status {0}")]
    Status(u16),
    #[error("host API rate limited, retry after {0:?}")]
    RateLimited(Duration),
    #[error("message {message_id} not found in channel {channel_id}")]
    MessageNotFound {
        channel_id: String,
        message_id: String,
    },
    #[error("attachment {attachment_id} not found on message {message_id}")]
    AttachmentNotFound {
        message_id: String,
        attachment_id: String,
    },
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    id: String,
    url: Url,
}

#[derive(Debug, Deserialize)]
struct RateLimit {
    retry_after: f64,
}

#[derive(Debug, Clone)]
struct CachedMessage {
    attachments: HashMap<String, Locator>,
    expires_at: DateTime<Utc>,
}

/// Client for the attachment host's message API
///
/// Attachment links are only obtainable by fetching the message that carries them. Fetched
/// messages are cached until the earliest link on them expires.
#[derive(Debug, Clone)]
pub struct HostApi {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    message_ttl: Duration,
    cache: Arc<Mutex<HashMap<(String, String), CachedMessage>>>,
}

impl HostApi {
    pub fn from_config(config: &HostApiConfig) -> Result<Self, HostApiError> {
        let token = config.token.clone().ok_or(HostApiError::MissingToken)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Self::new(client, config.base_url()?, token, config.message_ttl())
    }

    pub fn new(
        client: reqwest::Client,
        mut base_url: Url,
        token: impl Into<String>,
        message_ttl: Duration,
    ) -> Result<Self, HostApiError> {
        // joined paths are relative to the last segment
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client,
            base_url,
            token: token.into(),
            message_ttl,
            cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Current link for an attachment.
    ///
    /// A cached link equal to `stale` is not trusted; the message is fetched again.
    #[tracing::instrument(skip(self, stale), fields(message_id = %attachment.message_id))]
    pub async fn attachment_locator(
        &self,
        attachment: &AttachmentRef,
        stale: Option<&Locator>,
    ) -> Result<Locator, HostApiError> {
        let key = (attachment.channel_id.clone(), attachment.message_id.clone());

        if let Some(locator) = self.cached(&key, &attachment.attachment_id) {
            if stale != Some(&locator) {
                tracing::debug!("attachment link served from cache");
                return Ok(locator);
            }
        }

        let message = self.fetch_message(attachment).await?;
        let cached = self.cache_message(key, message);
        cached
            .attachments
            .get(&attachment.attachment_id)
            .cloned()
            .ok_or_else(|| HostApiError::AttachmentNotFound {
                message_id: attachment.message_id.clone(),
                attachment_id: attachment.attachment_id.clone(),
            })
    }

    fn cached(&self, key: &(String, String), attachment_id: &str) -> Option<Locator> {
        let mut cache = self.cache.lock();
        let entry = cache.get(key)?;
        if entry.expires_at <= Utc::now() {
            cache.remove(key);
            return None;
        }
        entry.attachments.get(attachment_id).cloned()
    }

    fn cache_message(&self, key: (String, String), message: Message) -> CachedMessage {
        let attachments: HashMap<String, Locator> = message
            .attachments
            .into_iter()
            .map(|a| (a.id, Locator::new(a.url)))
            .collect();

        let fallback = Utc::now()
            + chrono::Duration::from_std(self.message_ttl).unwrap_or(chrono::Duration::zero());
        let expires_at = attachments
            .values()
            .filter_map(Locator::expires_at)
            .min()
            .unwrap_or(fallback);

        let cached = CachedMessage {
            attachments,
            expires_at,
        };
        let now = Utc::now();
        let mut cache = self.cache.lock();
        cache.retain(|_, entry| entry.expires_at > now);
        cache.insert(key, cached.clone());
        cached
    }

    async fn fetch_message(&self, attachment: &AttachmentRef) -> Result<Message, HostApiError> {
        let url = self.base_url.join(&format!(
            "channels/{}/messages/{}",
            attachment.channel_id, attachment.message_id
        ))?;

        let mut rate_limited = false;
        loop {
            let response = self
                .client
                .get(url.clone())
                .header(AUTHORIZATION, format!("Bot {}", self.token))
                .send()
                .await?;

            match response.status() {
                status if status.is_success() => return Ok(response.json().await?),
                StatusCode::TOO_MANY_REQUESTS => {
                    let wait = retry_after(response).await;
                    if rate_limited || wait > MAX_RATE_LIMIT_WAIT {
                        tracing::error!(wait_ms = wait.as_millis() as u64, "host API rate limit");
                        return Err(HostApiError::RateLimited(wait));
                    }
                    tracing::warn!(wait_ms = wait.as_millis() as u64, "host API rate limited, waiting");
                    rate_limited = true;
                    tokio::time::sleep(wait).await;
                }
                StatusCode::NOT_FOUND => {
                    return Err(HostApiError::MessageNotFound {
                        channel_id: attachment.channel_id.clone(),
                        message_id: attachment.message_id.clone(),
                    })
                }
                status => return Err(HostApiError::Status(status.as_u16())),
            }
        }
    }
}

/// Wait requested by a 429, from the JSON body or else the `Retry-After` header
async fn retry_after(response: reqwest::Response) -> Duration {
    let header = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok());

    let body = response.json::<RateLimit>().await.ok().map(|r| r.retry_after);
    wait_from_secs(body.or(header).unwrap_or(1.0))
}

/// Saturates at [`Duration::MAX`] for waits too long to represent, infinity included
fn wait_from_secs(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> HostApi {
        HostApi::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:1/api").unwrap(),
            "token",
            Duration::from_secs(60),
        )
        .unwrap()
    }

    fn message(attachment_id: &str, expiry: DateTime<Utc>) -> Message {
        let url = format!(
            "https://cdn.example.com/attachments/c/{attachment_id}/blob?ex={:x}",
            expiry.timestamp()
        );
        Message {
            attachments: vec![Attachment {
                id: attachment_id.to_string(),
                url: Url::parse(&url).unwrap(),
            }],
        }
    }

    fn key(message_id: &str) -> (String, String) {
        ("chan".to_string(), message_id.to_string())
    }

    fn too_many_requests(header: Option<&str>, body: &str) -> reqwest::Response {
        let mut builder = http::Response::builder().status(429);
        if let Some(value) = header {
            builder = builder.header(RETRY_AFTER, value);
        }
        reqwest::Response::from(builder.body(body.to_string()).unwrap())
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        assert_eq!(api().base_url.as_str(), "http://127.0.0.1:1/api/");
    }

    #[test]
    fn test_wait_from_secs() {
        assert_eq!(wait_from_secs(0.25), Duration::from_millis(250));
        assert_eq!(wait_from_secs(-3.0), Duration::ZERO);
        assert_eq!(wait_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(wait_from_secs(f64::INFINITY), Duration::MAX);
        assert_eq!(wait_from_secs(1e300), Duration::MAX);
    }

    #[tokio::test]
    async fn test_retry_after_from_body_then_header() {
        let wait = retry_after(too_many_requests(Some("7"), r#"{"retry_after": 0.5}"#)).await;
        assert_eq!(wait, Duration::from_millis(500));

        let wait = retry_after(too_many_requests(Some("7"), "slow down")).await;
        assert_eq!(wait, Duration::from_secs(7));

        let wait = retry_after(too_many_requests(None, "")).await;
        assert_eq!(wait, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unbounded_retry_after_is_over_the_limit() {
        let wait = retry_after(too_many_requests(Some("inf"), "")).await;
        assert!(wait > MAX_RATE_LIMIT_WAIT);

        let wait = retry_after(too_many_requests(None, r#"{"retry_after": 1e300}"#)).await;
        assert!(wait > MAX_RATE_LIMIT_WAIT);
    }

    #[test]
    fn test_expired_messages_are_pruned_on_insert() {
        let api = api();
        let past = Utc::now() - chrono::Duration::minutes(5);
        let future = Utc::now() + chrono::Duration::hours(1);

        api.cache_message(key("old-1"), message("a", past));
        api.cache_message(key("old-2"), message("b", past));
        api.cache_message(key("live"), message("c", future));

        let cache = api.cache.lock();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key(&key("live")));
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Query parameter the attachment CDN uses for the link expiry (hex unix seconds)
const EXPIRY_PARAM: &str = "ex";

/// Remote location of a chunk's stored bytes
///
/// Attachment links are signed and expire. Once expired the host answers 404/403 and the
/// locator has to be refreshed from the chunk's stable [`AttachmentRef`](super::AttachmentRef).
/// `Debug` and `Display` drop the query string so signatures never reach the logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(Url);

impl Locator {
    pub fn new(url: Url) -> Self {
        Self(url)
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Expiry advertised by the link itself, if any
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let (_, value) = self.0.query_pairs().find(|(key, _)| key == EXPIRY_PARAM)?;
        let seconds = i64::from_str_radix(&value, 16).ok()?;
        Utc.timestamp_opt(seconds, 0).single()
    }

    /// Whether the link is known to be expired at `now`. Links without an expiry never are.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expiry| expiry <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// The URL without credentials, query or fragment
    pub fn redacted(&self) -> Url {
        let mut url = self.0.clone();
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}

impl FromStr for Locator {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Url::parse(s).map(Self)
    }
}

impl From<Url> for Locator {
    fn from(url: Url) -> Self {
        Self(url)
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locator({})", self.redacted())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

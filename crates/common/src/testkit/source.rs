use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::fetch::{ByteRange, ByteStream, ChunkSource, SourceError};
use crate::manifest::Locator;

/// Scripted failure for the next request to a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail the request as a transient error (connection reset, 503)
    Transient,
    /// Reject the locator (404)
    Expired,
    /// Answer with a non-retryable status
    Status(u16),
    /// Send this many bytes of the range, then end the body cleanly
    TruncateAfter(u64),
    /// Send this many bytes of the range, then fail the body as a transient error
    FailBodyAfter(u64),
    /// Send the range with one extra byte appended
    Overrun,
}

/// A request the source has served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub range: ByteRange,
}

/// In-memory [`ChunkSource`] with scripted faults, delays and request accounting
///
/// Blobs are keyed by the full locator URL, so a refreshed locator is just another key.
#[derive(Debug, Clone)]
pub struct MockChunkSource {
    inner: Arc<Mutex<MockChunkSourceInner>>,
}

#[derive(Debug)]
struct MockChunkSourceInner {
    blobs: HashMap<String, Bytes>,
    /// url -> faults consumed one per request
    faults: HashMap<String, VecDeque<Fault>>,
    /// urls that always answer 404
    expired: HashSet<String>,
    /// url -> wait before answering
    delays: HashMap<String, Duration>,
    requests: Vec<Request>,
    bytes_served: u64,
    /// Size of the parts bodies are split into
    part_size: usize,
}

impl Default for MockChunkSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChunkSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockChunkSourceInner {
                blobs: HashMap::new(),
                faults: HashMap::new(),
                expired: HashSet::new(),
                delays: HashMap::new(),
                requests: Vec::new(),
                bytes_served: 0,
                part_size: 1024,
            })),
        }
    }

    pub fn put(&self, locator: &Locator, bytes: impl Into<Bytes>) {
        self.inner
            .lock()
            .blobs
            .insert(locator.url().to_string(), bytes.into());
    }

    /// Queue a fault for the next request to `locator`
    pub fn push_fault(&self, locator: &Locator, fault: Fault) {
        self.inner
            .lock()
            .faults
            .entry(locator.url().to_string())
            .or_default()
            .push_back(fault);
    }

    /// Queue the same fault `times` times
    pub fn push_faults(&self, locator: &Locator, fault: Fault, times: usize) {
        for _ in 0..times {
            self.push_fault(locator, fault.clone());
        }
    }

    /// Make every request to `locator` answer 404 from now on
    pub fn expire(&self, locator: &Locator) {
        self.inner
            .lock()
            .expired
            .insert(locator.url().to_string());
    }

    pub fn set_delay(&self, locator: &Locator, delay: Duration) {
        self.inner
            .lock()
            .delays
            .insert(locator.url().to_string(), delay);
    }

    pub fn set_part_size(&self, part_size: usize) {
        self.inner.lock().part_size = part_size.max(1);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.inner.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// Requests made to `locator`
    pub fn requests_to(&self, locator: &Locator) -> Vec<Request> {
        let url = locator.url().to_string();
        self.inner
            .lock()
            .requests
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }

    /// Bytes handed out across all bodies
    pub fn bytes_served(&self) -> u64 {
        self.inner.lock().bytes_served
    }

    pub fn reset_counters(&self) {
        let mut inner = self.inner.lock();
        inner.requests.clear();
        inner.bytes_served = 0;
    }
}

#[async_trait]
impl ChunkSource for MockChunkSource {
    async fn open(&self, locator: &Locator, range: ByteRange) -> Result<ByteStream, SourceError> {
        let url = locator.url().to_string();
        let delay = {
            let mut inner = self.inner.lock();
            inner.requests.push(Request {
                url: url.clone(),
                range,
            });
            inner.delays.get(&url).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        if inner.expired.contains(&url) {
            return Err(SourceError::Expired(404));
        }
        let fault = inner.faults.get_mut(&url).and_then(|queue| queue.pop_front());
        let Some(blob) = inner.blobs.get(&url).cloned() else {
            return Err(SourceError::Expired(404));
        };
        if range.end > blob.len() as u64 {
            return Err(SourceError::Status(416));
        }
        let body = blob.slice(range.start as usize..range.end as usize);

        let (body, tail) = match fault {
            None => (body, None),
            Some(Fault::Transient) => {
                return Err(SourceError::Transient("connection reset by mock".to_string()))
            }
            Some(Fault::Expired) => return Err(SourceError::Expired(404)),
            Some(Fault::Status(status)) => return Err(SourceError::Status(status)),
            Some(Fault::TruncateAfter(n)) => (body.slice(..(n as usize).min(body.len())), None),
            Some(Fault::FailBodyAfter(n)) => (
                body.slice(..(n as usize).min(body.len())),
                Some(Err(SourceError::Transient("body interrupted by mock".to_string()))),
            ),
            Some(Fault::Overrun) => {
                let mut extended = body.to_vec();
                extended.push(0);
                (Bytes::from(extended), None)
            }
        };

        inner.bytes_served += body.len() as u64;
        let part_size = inner.part_size;
        drop(inner);

        let mut parts: Vec<Result<Bytes, SourceError>> = Vec::new();
        let mut offset = 0;
        while offset < body.len() {
            let end = (offset + part_size).min(body.len());
            parts.push(Ok(body.slice(offset..end)));
            offset = end;
        }
        parts.extend(tail);

        Ok(futures::stream::iter(parts).boxed())
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::retry::RetryConfig;
use super::source::{ByteRange, ByteStream, ChunkSource, SourceError};
use crate::error::StreamError;
use crate::manifest::{ChunkRef, Locator, ManifestError, ManifestResolver};

type RefreshFuture = Shared<BoxFuture<'static, Result<Locator, ManifestError>>>;

/// Fetches the stored bytes of chunks, hiding transient upstream failures
///
/// Cheap to clone; clones share the source, the resolver and the in-flight refresh table.
#[derive(Clone)]
pub struct ChunkFetcher {
    source: Arc<dyn ChunkSource>,
    resolver: Arc<dyn ManifestResolver>,
    retry: RetryConfig,
    refreshes: Arc<Mutex<HashMap<String, RefreshFuture>>>,
}

impl std::fmt::Debug for ChunkFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkFetcher")
            .field("source", &self.source)
            .field("resolver", &self.resolver)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ChunkFetcher {
    pub fn new(
        source: Arc<dyn ChunkSource>,
        resolver: Arc<dyn ManifestResolver>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            source,
            resolver,
            retry,
            refreshes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Stream the stored bytes `range` of `chunk`.
    ///
    /// Nothing happens until the stream is polled. The stream yields exactly `range.len()`
    ///  bytes and ends, or ends with a single error:
    /// * [`StreamError::ChunkUnavailable`] - retries spent, or the locator was rejected after
    ///   its one refresh
    /// * [`StreamError::ChunkTruncated`] - the body ended early or ran past the range
    /// * [`StreamError::Cancelled`] - `cancel` fired
    ///
    /// A transient failure mid-body reconnects from the first byte not yet yielded.
    pub fn fetch(
        &self,
        chunk: ChunkRef,
        range: ByteRange,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<Bytes, StreamError>> {
        let attempt = FetchAttempt {
            fetcher: self.clone(),
            locator: chunk.locator.clone(),
            chunk,
            range,
            cancel,
            received: 0,
            retries: 0,
            refreshed: false,
            body: None,
            done: false,
        };

        futures::stream::unfold(attempt, |mut attempt| async move {
            let item = attempt.next().await?;
            Some((item, attempt))
        })
        .boxed()
    }

    /// Refresh a chunk's locator, joining a refresh already in flight for the same attachment
    ///
    /// The refresh runs as its own task and drops out of the table when it finishes, whether
    ///  or not anyone is still waiting on it.
    async fn refresh(&self, chunk: &ChunkRef) -> Result<Locator, ManifestError> {
        let key = chunk.attachment.attachment_id.clone();
        let pending = {
            let mut refreshes = self.refreshes.lock();
            refreshes
                .entry(key.clone())
                .or_insert_with(|| {
                    let resolver = self.resolver.clone();
                    let chunk = chunk.clone();
                    let entry = RefreshEntry {
                        refreshes: self.refreshes.clone(),
                        key,
                    };
                    tokio::spawn(async move {
                        let _entry = entry;
                        resolver.refresh_locator(&chunk).await
                    })
                    .map(|joined| {
                        joined.unwrap_or_else(|e| {
                            Err(ManifestError::Backend(format!(
                                "locator refresh task failed: {}",
                                e
                            )))
                        })
                    })
                    .boxed()
                    .shared()
                })
                .clone()
        };

        pending.await
    }

    #[cfg(test)]
    fn refreshes_in_flight(&self) -> usize {
        self.refreshes.lock().len()
    }
}

/// Removes a refresh from the in-flight table when its task ends
///
/// Only the task that inserted an entry removes it, so the entry under `key` is always its own.
struct RefreshEntry {
    refreshes: Arc<Mutex<HashMap<String, RefreshFuture>>>,
    key: String,
}

impl Drop for RefreshEntry {
    fn drop(&mut self) {
        self.refreshes.lock().remove(&self.key);
    }
}

struct FetchAttempt {
    fetcher: ChunkFetcher,
    chunk: ChunkRef,
    locator: Locator,
    range: ByteRange,
    cancel: CancellationToken,
    /// Bytes yielded so far
    received: u64,
    /// Transient retries consumed
    retries: u32,
    /// Whether the one locator refresh has been spent
    refreshed: bool,
    body: Option<ByteStream>,
    done: bool,
}

impl FetchAttempt {
    async fn next(&mut self) -> Option<Result<Bytes, StreamError>> {
        if self.done {
            return None;
        }
        let item = self.advance().await;
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
            self.body = None;
        }
        item
    }

    async fn advance(&mut self) -> Option<Result<Bytes, StreamError>> {
        loop {
            if self.cancel.is_cancelled() {
                return Some(Err(StreamError::Cancelled));
            }

            let Some(body) = self.body.as_mut() else {
                if self.received == self.range.len() {
                    return None;
                }
                match self.connect().await {
                    Ok(body) => self.body = Some(body),
                    Err(e) => return Some(Err(e)),
                }
                continue;
            };

            let timeout = self.fetcher.retry.attempt_timeout;
            let read = tokio::select! {
                _ = self.cancel.cancelled() => return Some(Err(StreamError::Cancelled)),
                read = tokio::time::timeout(timeout, body.next()) => read,
            };

            match read {
                Ok(Some(Ok(bytes))) => {
                    let remaining = self.range.len() - self.received;
                    if bytes.len() as u64 > remaining {
                        return Some(Err(self.truncated(self.received + bytes.len() as u64)));
                    }
                    if bytes.is_empty() {
                        continue;
                    }
                    self.received += bytes.len() as u64;
                    return Some(Ok(bytes));
                }
                Ok(None) => {
                    self.body = None;
                    if self.received == self.range.len() {
                        return None;
                    }
                    return Some(Err(self.truncated(self.received)));
                }
                Ok(Some(Err(SourceError::Transient(reason)))) => {
                    self.body = None;
                    if let Err(e) = self.backoff(format!("body read failed: {}", reason)).await {
                        return Some(Err(e));
                    }
                }
                Ok(Some(Err(SourceError::Malformed(reason)))) => {
                    tracing::warn!(chunk = self.chunk.index, %reason, "malformed chunk body");
                    return Some(Err(self.truncated(self.received)));
                }
                Ok(Some(Err(other))) => {
                    return Some(Err(self.unavailable(other.to_string())));
                }
                Err(_) => {
                    self.body = None;
                    if let Err(e) = self.backoff("body read timed out".to_string()).await {
                        return Some(Err(e));
                    }
                }
            }
        }
    }

    /// Open a body for the bytes not yet received
    async fn connect(&mut self) -> Result<ByteStream, StreamError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }
            if !self.refreshed && self.locator.is_expired() {
                self.refresh("locator past its expiry").await?;
            }

            let range = ByteRange::new(self.range.start + self.received, self.range.end);
            tracing::debug!(
                chunk = self.chunk.index,
                locator = %self.locator,
                range = %range,
                retry = self.retries,
                "fetching chunk"
            );

            let timeout = self.fetcher.retry.attempt_timeout;
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => return Err(StreamError::Cancelled),
                opened = tokio::time::timeout(timeout, self.fetcher.source.open(&self.locator, range)) => opened,
            };

            match opened {
                Ok(Ok(body)) => return Ok(body),
                Ok(Err(SourceError::Expired(status))) => {
                    if self.refreshed {
                        return Err(self.unavailable(format!(
                            "locator rejected with status {} after refresh",
                            status
                        )));
                    }
                    self.refresh(&format!("locator rejected with status {}", status))
                        .await?;
                }
                Ok(Err(SourceError::Transient(reason))) => self.backoff(reason).await?,
                Ok(Err(SourceError::Malformed(reason))) => {
                    tracing::warn!(chunk = self.chunk.index, %reason, "malformed chunk response");
                    return Err(self.truncated(self.received));
                }
                Ok(Err(SourceError::Status(status))) => {
                    return Err(self.unavailable(format!("upstream returned status {}", status)));
                }
                Err(_) => self.backoff("request timed out".to_string()).await?,
            }
        }
    }

    async fn backoff(&mut self, reason: String) -> Result<(), StreamError> {
        if self.retries >= self.fetcher.retry.max_retries {
            tracing::error!(
                chunk = self.chunk.index,
                attempts = self.retries + 1,
                %reason,
                "giving up on chunk"
            );
            return Err(self.unavailable(format!(
                "{} (gave up after {} attempts)",
                reason,
                self.retries + 1
            )));
        }

        let delay = self.fetcher.retry.backoff_delay(self.retries);
        self.retries += 1;
        tracing::warn!(
            chunk = self.chunk.index,
            retry = self.retries,
            delay_ms = delay.as_millis() as u64,
            resume_at = self.range.start + self.received,
            %reason,
            "transient chunk fetch failure, retrying"
        );

        tokio::select! {
            _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn refresh(&mut self, reason: &str) -> Result<(), StreamError> {
        self.refreshed = true;
        tracing::warn!(chunk = self.chunk.index, %reason, "refreshing chunk locator");

        let mut chunk = self.chunk.clone();
        chunk.locator = self.locator.clone();
        let refreshed = tokio::select! {
            _ = self.cancel.cancelled() => return Err(StreamError::Cancelled),
            refreshed = self.fetcher.refresh(&chunk) => refreshed,
        };

        self.locator = refreshed.map_err(|e| self.unavailable(e.to_string()))?;
        Ok(())
    }

    fn unavailable(&self, reason: String) -> StreamError {
        StreamError::ChunkUnavailable {
            index: self.chunk.index,
            reason,
        }
    }

    fn truncated(&self, received: u64) -> StreamError {
        StreamError::ChunkTruncated {
            index: self.chunk.index,
            expected: self.range.len(),
            received,
        }
    }
}

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;

use super::chunk::{read_chunk, ChunkRead};
use super::range::ByteSpan;
use crate::error::StreamError;
use crate::fetch::ChunkFetcher;
use crate::manifest::FileId;

/// One open range read over a logical file
///
/// Chunks are fetched and decrypted concurrently, at most `window` of them ahead of the
/// delivery watermark (in flight or buffered). Completions land in a reorder buffer keyed by
/// position, and bytes are only released in file order.
///
/// Dropping the session cancels every in-flight fetch.
pub struct StreamSession {
    file_id: FileId,
    span: ByteSpan,
    fetcher: ChunkFetcher,
    reads: Vec<ChunkRead>,
    window: usize,
    /// Position in `reads` of the next chunk to deliver
    watermark: usize,
    /// Position in `reads` of the next chunk to schedule
    scheduled: usize,
    tasks: JoinSet<(usize, Result<Bytes, StreamError>)>,
    /// Position of each task still in `tasks`
    positions: HashMap<Id, usize>,
    ready: BTreeMap<usize, Result<Bytes, StreamError>>,
    cancel: CancellationToken,
    delivered: u64,
    finished: bool,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("file_id", &self.file_id)
            .field("span", &self.span)
            .field("window", &self.window)
            .field("watermark", &self.watermark)
            .field("scheduled", &self.scheduled)
            .field("delivered", &self.delivered)
            .field("finished", &self.finished)
            .finish()
    }
}

impl StreamSession {
    pub(crate) fn new(
        file_id: FileId,
        span: ByteSpan,
        reads: Vec<ChunkRead>,
        fetcher: ChunkFetcher,
        window: usize,
    ) -> Self {
        let finished = reads.is_empty();
        Self {
            file_id,
            span,
            fetcher,
            reads,
            window: window.max(1),
            watermark: 0,
            scheduled: 0,
            tasks: JoinSet::new(),
            positions: HashMap::new(),
            ready: BTreeMap::new(),
            cancel: CancellationToken::new(),
            delivered: 0,
            finished,
        }
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn span(&self) -> ByteSpan {
        self.span
    }

    /// Bytes the session delivers in total
    pub fn content_length(&self) -> u64 {
        self.span.len()
    }

    /// Bytes delivered so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Token that closes the session when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Chunks fetching, decrypting or waiting in the reorder buffer
    pub fn pending(&self) -> usize {
        self.scheduled - self.watermark
    }

    /// Next decrypted chunk slice in file order.
    ///
    /// Returns `None` after the final byte. An error is terminal: it is returned once, every
    ///  in-flight fetch is cancelled and every later call returns `None`.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, StreamError>> {
        if self.finished {
            return None;
        }

        loop {
            if self.cancel.is_cancelled() {
                self.shutdown();
                return Some(Err(StreamError::Cancelled));
            }

            if let Some(result) = self.ready.remove(&self.watermark) {
                return Some(self.deliver(result));
            }

            self.schedule();

            let joined = tokio::select! {
                _ = self.cancel.cancelled() => continue,
                joined = self.tasks.join_next_with_id() => joined,
            };

            match joined {
                Some(Ok((id, (position, result)))) => {
                    self.positions.remove(&id);
                    self.ready.insert(position, result);
                }
                Some(Err(err)) => {
                    // A task only fails to join when it panicked
                    let position = self.positions.remove(&err.id()).unwrap_or(self.watermark);
                    let index = self.reads.get(position).map(|r| r.chunk.index).unwrap_or(0);
                    tracing::error!(file_id = %self.file_id, chunk = index, error = %err, "chunk task failed");
                    self.ready.insert(
                        position,
                        Err(StreamError::ChunkUnavailable {
                            index,
                            reason: format!("chunk task failed: {}", err),
                        }),
                    );
                }
                None => {
                    let index = self.reads[self.watermark].chunk.index;
                    self.shutdown();
                    return Some(Err(StreamError::ChunkUnavailable {
                        index,
                        reason: "no fetch in flight for chunk".to_string(),
                    }));
                }
            }
        }
    }

    /// Stop the session. Nothing further is delivered and in-flight fetches are cancelled.
    pub fn close(&mut self) {
        if !self.finished {
            tracing::debug!(
                file_id = %self.file_id,
                delivered = self.delivered,
                "closing stream session"
            );
        }
        self.shutdown();
    }

    /// Adapt into a byte stream, e.g. for an HTTP body
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes, StreamError>> {
        futures::stream::unfold(self, |mut session| async move {
            let item = session.next_chunk().await?;
            Some((item, session))
        })
        .boxed()
    }

    fn deliver(&mut self, result: Result<Bytes, StreamError>) -> Result<Bytes, StreamError> {
        match result {
            Ok(bytes) => {
                self.watermark += 1;
                self.delivered += bytes.len() as u64;
                if self.watermark == self.reads.len() {
                    tracing::debug!(
                        file_id = %self.file_id,
                        span = %self.span,
                        delivered = self.delivered,
                        "stream session complete"
                    );
                    self.shutdown();
                }
                Ok(bytes)
            }
            Err(err) => {
                tracing::error!(
                    file_id = %self.file_id,
                    span = %self.span,
                    delivered = self.delivered,
                    error = %err,
                    "stream session failed"
                );
                self.shutdown();
                Err(err)
            }
        }
    }

    /// Fill the window from the watermark
    fn schedule(&mut self) {
        // Stop scheduling past a chunk already known to have failed
        let limit = self
            .ready
            .iter()
            .find(|(_, result)| result.is_err())
            .map(|(position, _)| *position + 1)
            .unwrap_or(self.reads.len());
        let limit = limit.min(self.watermark + self.window);

        while self.scheduled < limit {
            let position = self.scheduled;
            let read = self.reads[position].clone();
            let fetcher = self.fetcher.clone();
            let file_id = self.file_id.clone();
            let cancel = self.cancel.child_token();

            let handle = self.tasks.spawn(async move {
                (position, read_chunk(fetcher, file_id, read, cancel).await)
            });
            self.positions.insert(handle.id(), position);
            self.scheduled += 1;
        }
    }

    fn shutdown(&mut self) {
        self.finished = true;
        self.cancel.cancel();
        self.tasks.abort_all();
        self.ready.clear();
        self.positions.clear();
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

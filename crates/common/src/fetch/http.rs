use async_trait::async_trait;
use futures::{future, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;

use super::source::{ByteRange, ByteStream, ChunkSource, SourceError};
use crate::manifest::Locator;

/// [`ChunkSource`] over plain HTTPS range requests against attachment CDN links
#[derive(Debug, Clone)]
pub struct HttpChunkSource {
    client: reqwest::Client,
}

impl HttpChunkSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpChunkSource {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

/// Sort a non-success status into the fetcher's failure classes
pub fn classify_status(status: StatusCode) -> SourceError {
    match status.as_u16() {
        403 | 404 | 410 => SourceError::Expired(status.as_u16()),
        408 | 429 => SourceError::Transient(format!("status {}", status)),
        code if status.is_server_error() => SourceError::Transient(format!("status {}", code)),
        code => SourceError::Status(code),
    }
}

#[async_trait]
impl ChunkSource for HttpChunkSource {
    async fn open(&self, locator: &Locator, range: ByteRange) -> Result<ByteStream, SourceError> {
        let mut request = self.client.get(locator.url().clone());
        if let Some(value) = range.header_value() {
            request = request.header(RANGE, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Transient(e.without_url().to_string()))?;

        let status = response.status();
        let skip = match status {
            StatusCode::PARTIAL_CONTENT => {
                check_content_range(response.headers().get(CONTENT_RANGE), range)?;
                0
            }
            // Server ignored the range and sent the whole attachment
            StatusCode::OK => {
                tracing::debug!(
                    locator = %locator,
                    range = %range,
                    "range ignored upstream, skipping prefix"
                );
                range.start
            }
            other => return Err(classify_status(other)),
        };

        let body = response
            .bytes_stream()
            .map_err(|e| SourceError::Transient(e.without_url().to_string()))
            .boxed();
        Ok(window(body, skip, range.len()))
    }
}

fn check_content_range(
    header: Option<&reqwest::header::HeaderValue>,
    range: ByteRange,
) -> Result<(), SourceError> {
    // Optional on the wire; only checked when present
    let Some(value) = header.and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    let start = value
        .trim()
        .strip_prefix("bytes ")
        .and_then(|rest| rest.split('-').next())
        .and_then(|start| start.trim().parse::<u64>().ok())
        .ok_or_else(|| SourceError::Malformed(format!("bad Content-Range: {}", value)))?;

    if start != range.start {
        return Err(SourceError::Malformed(format!(
            "Content-Range {} does not start at {}",
            value, range.start
        )));
    }
    Ok(())
}

/// Drop the first `skip` bytes of `body` and end it after `take` more
pub(crate) fn window(body: ByteStream, skip: u64, take: u64) -> ByteStream {
    body.scan((skip, take), |(skip, take), item| {
        let item = match item {
            Err(e) => Some(Err(e)),
            Ok(_) if *take == 0 => None,
            Ok(mut bytes) => {
                let dropped = (*skip).min(bytes.len() as u64);
                *skip -= dropped;
                let mut bytes = bytes.split_off(dropped as usize);
                let kept = (*take).min(bytes.len() as u64);
                *take -= kept;
                bytes.truncate(kept as usize);
                Some(Ok(bytes))
            }
        };
        future::ready(item)
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn body(parts: &[&'static [u8]]) -> ByteStream {
        let parts: Vec<Result<Bytes, SourceError>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        stream::iter(parts).boxed()
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        stream
            .try_fold(Vec::new(), |mut acc, bytes| async move {
                acc.extend_from_slice(&bytes);
                Ok(acc)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_window_skips_prefix_across_parts() {
        let out = collect(window(body(&[b"abc", b"defg", b"hij"]), 5, 3)).await;
        assert_eq!(out, b"fgh");
    }

    #[tokio::test]
    async fn test_window_passthrough() {
        let out = collect(window(body(&[b"abc", b"def"]), 0, 6)).await;
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::NOT_FOUND), SourceError::Expired(404));
        assert_eq!(classify_status(StatusCode::FORBIDDEN), SourceError::Expired(403));
        assert!(classify_status(StatusCode::BAD_GATEWAY).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT).is_transient());
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), SourceError::Status(400));
    }

    #[test]
    fn test_content_range_start_checked() {
        let range = ByteRange::new(100, 200);
        let ok = reqwest::header::HeaderValue::from_static("bytes 100-199/1000");
        let bad = reqwest::header::HeaderValue::from_static("bytes 0-99/1000");
        assert!(check_content_range(Some(&ok), range).is_ok());
        assert!(matches!(
            check_content_range(Some(&bad), range),
            Err(SourceError::Malformed(_))
        ));
        assert!(check_content_range(None, range).is_ok());
    }
}

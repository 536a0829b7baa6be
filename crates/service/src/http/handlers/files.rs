use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, StreamExt};
use serde::Deserialize;

use common::error::StreamError;
use common::manifest::FileId;
use common::stream::{ByteSpan, RangeHeader, RangeHeaderError};

use crate::ServiceState;

#[derive(Debug, Default, Deserialize)]
pub struct FileQuery {
    /// Serve with `Content-Disposition: inline` so browsers preview instead of download
    #[serde(default)]
    pub inline: bool,
}

/// `GET /files/:file_id`
///
/// Streams the decrypted file, or the single byte range asked for in the `Range` header.
/// `HEAD` gets the same headers without touching the upstream.
#[tracing::instrument(skip(state, headers))]
pub async fn handler(
    method: Method,
    State(state): State<ServiceState>,
    Path(file_id): Path<String>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Result<Response, FileError> {
    let file_id = FileId::new(file_id);
    let engine = state.engine();
    let file = engine.resolve(&file_id).await?;

    let span = match requested_range(&headers) {
        Some(Ok(range)) => Some(range.resolve(file.total_size)?),
        Some(Err(RangeHeaderError::UnsupportedUnit(unit))) => {
            tracing::debug!(unit = %unit, "ignoring range in unsupported unit");
            None
        }
        Some(Err(reason)) => {
            return Err(FileError::InvalidRange {
                total_size: file.total_size,
                reason,
            })
        }
        None => None,
    };

    let whole = ByteSpan::whole(file.total_size);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(CONTENT_LENGTH, HeaderValue::from(span.unwrap_or(whole).len()));
    response_headers.insert(
        CONTENT_TYPE,
        content_type(file.mime_type.as_deref(), &file.name),
    );
    if let Ok(disposition) = HeaderValue::try_from(content_disposition(&file.name, query.inline)) {
        response_headers.insert(CONTENT_DISPOSITION, disposition);
    }

    let status = match span {
        Some(span) => {
            if let Ok(range) = HeaderValue::try_from(span.content_range(file.total_size)) {
                response_headers.insert(CONTENT_RANGE, range);
            }
            StatusCode::PARTIAL_CONTENT
        }
        None => StatusCode::OK,
    };

    if method == Method::HEAD {
        return Ok((status, response_headers, Body::empty()).into_response());
    }

    // Hold the headers back until the first chunk arrives so an upstream that is
    // gone from the start still gets a proper status
    let mut session = engine.open_resolved(&file, span.unwrap_or(whole)).session;
    let first = session.next_chunk().await.transpose()?;
    let body = stream::iter(first.map(Ok)).chain(session.into_stream());

    Ok((status, response_headers, Body::from_stream(body)).into_response())
}

fn requested_range(headers: &HeaderMap) -> Option<Result<RangeHeader, RangeHeaderError>> {
    let value = headers.get(RANGE)?;
    Some(match value.to_str() {
        Ok(raw) => raw.parse(),
        Err(_) => Err(RangeHeaderError::Malformed("non-ascii range header".to_string())),
    })
}

fn content_type(mime_type: Option<&str>, filename: &str) -> HeaderValue {
    mime_type
        .and_then(|m| HeaderValue::from_str(m).ok())
        .unwrap_or_else(|| {
            let guess = mime_guess::from_path(filename).first_or_octet_stream();
            HeaderValue::from_str(guess.as_ref())
                .unwrap_or(HeaderValue::from_static("application/octet-stream"))
        })
}

/// `Content-Disposition` with an ASCII fallback name and, for anything else, an
/// RFC 5987 `filename*`.
pub(crate) fn content_disposition(filename: &str, inline: bool) -> String {
    let kind = if inline { "inline" } else { "attachment" };
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    let fallback = if fallback.trim().is_empty() {
        "download".to_string()
    } else {
        fallback
    };

    if fallback == filename {
        format!("{kind}; filename=\"{fallback}\"")
    } else {
        format!(
            "{kind}; filename=\"{fallback}\"; filename*=UTF-8''{}",
            percent_encode(filename)
        )
    }
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => out.push(byte as char),
            b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("unsatisfiable range: {reason}")]
    InvalidRange {
        total_size: u64,
        reason: RangeHeaderError,
    },
}

impl FileError {
    pub fn status(&self) -> StatusCode {
        match self {
            FileError::InvalidRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            FileError::Stream(err) => match err {
                StreamError::RangeOutOfBounds { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
                StreamError::ManifestNotFound(_) => StatusCode::NOT_FOUND,
                StreamError::ChunkUnavailable { .. }
                | StreamError::ChunkTruncated { .. }
                | StreamError::ManifestUnavailable(_) => StatusCode::BAD_GATEWAY,
                StreamError::ManifestCorrupt { .. }
                | StreamError::IntegrityFailure { .. }
                | StreamError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn total_size(&self) -> Option<u64> {
        match self {
            FileError::InvalidRange { total_size, .. }
            | FileError::Stream(StreamError::RangeOutOfBounds { total_size, .. }) => {
                Some(*total_size)
            }
            _ => None,
        }
    }
}

impl IntoResponse for FileError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "file request failed");
        } else {
            tracing::debug!(error = %self, "file request rejected");
        }

        let msg = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "unexpected error".to_string(),
            _ => self.to_string(),
        };
        let mut response = (status, Json(serde_json::json!({ "msg": msg }))).into_response();
        if let Some(total_size) = self.total_size() {
            if let Ok(value) = HeaderValue::try_from(format!("bytes */{total_size}")) {
                response.headers_mut().insert(CONTENT_RANGE, value);
            }
        }
        response
    }
}

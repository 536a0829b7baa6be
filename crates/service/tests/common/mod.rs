//! Shared helpers for gateway integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_RANGE, RANGE};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get as route_get;
use axum::{Json, Router};
use parking_lot::Mutex;
use tempfile::TempDir;
use tower::ServiceExt;
use url::Url;

use common::crypto::CipherKind;
use common::fetch::RetryConfig;
use common::manifest::{LogicalFile, Locator};
use common::stream::{EngineConfig, RangeHeader};
use common::testkit::{FileFixture, TestHarness};
use service::{CatalogResolver, ServiceState};

pub const API_TOKEN: &str = "test-token";

/// Gateway state over a temporary catalog and the in-memory chunk source
pub struct MockGateway {
    pub dir: TempDir,
    pub harness: TestHarness,
    pub catalog: CatalogResolver,
    pub state: ServiceState,
}

impl MockGateway {
    pub fn new(window: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let harness = TestHarness::new();
        let catalog = CatalogResolver::new(dir.path(), None);
        let state = ServiceState::new(
            catalog.clone(),
            Arc::new(harness.source.clone()),
            EngineConfig {
                window,
                retry: RetryConfig::immediate(2),
            },
        );
        Self {
            dir,
            harness,
            catalog,
            state,
        }
    }

    /// Encrypt a file into the mock source and publish its manifest to the catalog
    pub async fn publish(&self, id: &str, name: &str, lengths: &[u64], kind: CipherKind) -> FileFixture {
        let fixture = self
            .harness
            .fixture(id)
            .name(name)
            .chunks(lengths, kind)
            .build(&self.harness.store, &self.harness.source)
            .unwrap();
        self.catalog.store(&fixture.file).await.unwrap();
        fixture
    }

    pub fn router(&self) -> Router {
        service::http::router(self.state.clone())
    }
}

pub async fn get(router: Router, uri: &str, headers: &[(&str, &str)]) -> Response {
    send(router, Method::GET, uri, headers).await
}

pub async fn send(router: Router, method: Method, uri: &str, headers: &[(&str, &str)]) -> Response {
    let mut request = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    router
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub fn header<'a>(response: &'a Response, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {name}"))
        .to_str()
        .unwrap()
}

#[derive(Default)]
struct UpstreamInner {
    blobs: HashMap<String, Vec<u8>>,
    // (channel, message) -> [(attachment id, url)]
    messages: HashMap<(String, String), Vec<(String, String)>>,
    api_calls: usize,
    rate_limits: usize,
}

/// A local stand-in for the attachment host: a CDN under `/blobs` and the message API under `/api`
#[derive(Clone)]
pub struct Upstream {
    addr: SocketAddr,
    inner: Arc<Mutex<UpstreamInner>>,
}

impl Upstream {
    pub async fn spawn() -> Self {
        let inner = Arc::new(Mutex::new(UpstreamInner::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new()
            .route("/blobs/:name", route_get(blob))
            .route("/api/channels/:channel/messages/:message", route_get(message))
            .with_state(inner.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, inner }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path)).unwrap()
    }

    pub fn api_base(&self) -> Url {
        self.url("/api/")
    }

    pub fn blob_locator(&self, name: &str) -> Locator {
        Locator::new(self.url(&format!("/blobs/{name}")))
    }

    pub fn put_blob(&self, name: &str, bytes: Vec<u8>) {
        self.inner.lock().blobs.insert(name.to_string(), bytes);
    }

    pub fn put_message(&self, channel: &str, message: &str, attachments: &[(&str, Url)]) {
        self.inner.lock().messages.insert(
            (channel.to_string(), message.to_string()),
            attachments
                .iter()
                .map(|(id, url)| (id.to_string(), url.to_string()))
                .collect(),
        );
    }

    /// Answer the next `count` API calls with 429
    pub fn rate_limit(&self, count: usize) {
        self.inner.lock().rate_limits = count;
    }

    pub fn api_calls(&self) -> usize {
        self.inner.lock().api_calls
    }

    /// Move a fixture's ciphertext onto this upstream, one blob per chunk, and point the
    /// manifest at it
    pub fn host(&self, fixture: &FileFixture) -> LogicalFile {
        let mut file = fixture.file.clone();
        let layout = file.layout();
        for chunk in file.chunks.iter_mut() {
            let start = layout.chunk_start(chunk.index);
            let plaintext = fixture.slice(start, start + chunk.byte_length);
            let name = format!("{}-{}", file.id, chunk.index);
            self.put_blob(&name, chunk.cipher.seal(plaintext).unwrap());
            chunk.locator = self.blob_locator(&name);
        }
        file
    }
}

async fn blob(
    State(inner): State<Arc<Mutex<UpstreamInner>>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(data) = inner.lock().blobs.get(&name).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let total = data.len() as u64;

    let range = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<RangeHeader>().ok());
    match range.map(|r| r.resolve(total)) {
        Some(Ok(span)) => (
            StatusCode::PARTIAL_CONTENT,
            [(CONTENT_RANGE, span.content_range(total))],
            data[span.start as usize..span.end as usize].to_vec(),
        )
            .into_response(),
        Some(Err(_)) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        None => (StatusCode::OK, data).into_response(),
    }
}

async fn message(
    State(inner): State<Arc<Mutex<UpstreamInner>>>,
    Path((channel, message)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bot {API_TOKEN}"));
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let mut inner = inner.lock();
    inner.api_calls += 1;
    if inner.rate_limits > 0 {
        inner.rate_limits -= 1;
        let body = serde_json::json!({"message": "You are being rate limited.", "retry_after": 0.05, "global": false});
        return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    }

    match inner.messages.get(&(channel, message.clone())) {
        Some(attachments) => {
            let attachments: Vec<_> = attachments
                .iter()
                .map(|(id, url)| serde_json::json!({"id": id, "url": url, "filename": "blob"}))
                .collect();
            Json(serde_json::json!({"id": message, "attachments": attachments})).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub fn message_ttl() -> Duration {
    Duration::from_secs(3600)
}

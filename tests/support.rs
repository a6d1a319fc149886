#![allow(dead_code)]

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use chat_stream_core::infra::settings::TransportSettings;
use chat_stream_core::Transport;
use futures_core::Stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const HEADER_GENERATION_ID: &str = "gen-header-1";

pub const OK_STREAM: &str = concat!(
    ": OPENROUTER PROCESSING\n\n",
    "data: {\"id\":\"gen-header-1\",\"model\":\"openai/gpt-4o\",\"provider\":\"OpenAI\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"reasoning\":\"thinking\"}}]}\n\n",
    "data: {\"id\":\"gen-header-1\",\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
    "data: {\"id\":\"gen-header-1\",\"choices\":[{\"delta\":{\"content\":\", world\"},\"finish_reason\":\"stop\"}]}\n\n",
    "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":12,\"completion_tokens\":3,\"total_tokens\":15}}\n\n",
    "data: [DONE]\n\n",
);

pub const BROKEN_STREAM: &str = concat!(
    "data: {\"id\":\"gen-broken\",\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
    "data: {\"error\":{\"code\":\"server_error\",\"message\":\"upstream crashed\"},\"choices\":[{\"delta\":{},\"finish_reason\":\"error\"}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
);

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: &'static str,
    pub authorization: Option<String>,
    pub request_id: Option<String>,
    pub accept: Option<String>,
    pub body: Value,
}

#[derive(Clone, Default)]
struct UpstreamState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl UpstreamState {
    fn record(&self, path: &'static str, headers: &HeaderMap, body: &Bytes) {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let recorded = RecordedRequest {
            path,
            authorization: text("authorization"),
            request_id: text("x-request-id"),
            accept: text("accept"),
            body: serde_json::from_slice(body).unwrap_or(Value::Null),
        };
        self.requests.lock().expect("lock requests").push(recorded);
    }
}

/// Local chat-completions upstream; each scenario lives under its own base path.
pub struct MockUpstream {
    addr: SocketAddr,
    state: UpstreamState,
    task: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let state = UpstreamState::default();
        let app = Router::new()
            .route("/ok/v1/chat/completions", post(ok_stream))
            .route("/limited/v1/chat/completions", post(rate_limited))
            .route("/slow/v1/chat/completions", post(slow_headers))
            .route("/broken/v1/chat/completions", post(broken_stream))
            .route("/stall/v1/chat/completions", post(stalled_stream))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                eprintln!("mock upstream stopped: {err}");
            }
        });

        Self { addr, state, task }
    }

    pub fn base_url(&self, scenario: &str) -> String {
        format!("http://{}/{scenario}/v1", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("lock requests").clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn transport(base_url: &str, request_timeout_ms: u64) -> Transport {
    Transport::new(&TransportSettings {
        base_url: base_url.to_string(),
        request_timeout_ms,
        connect_timeout_ms: 2_000,
    })
    .expect("transport")
}

pub fn chat_body() -> Value {
    json!({
        "model": "openai/gpt-4o",
        "messages": [{"role": "user", "content": "say hello"}],
        "stream": true,
        "usage": {"include": true},
    })
}

/// Base URL on a port nothing listens on.
pub fn closed_port_base_url() -> String {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("bind free port");
    let port = listener.local_addr().expect("free port addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}/v1")
}

fn sse(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

async fn ok_stream(State(state): State<UpstreamState>, headers: HeaderMap, body: Bytes) -> Response {
    state.record("ok", &headers, &body);
    let mut response = sse(Body::from(OK_STREAM));
    response.headers_mut().insert(
        "x-generation-id",
        header::HeaderValue::from_static(HEADER_GENERATION_ID),
    );
    response
}

async fn rate_limited(
    State(state): State<UpstreamState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.record("limited", &headers, &body);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"error":{"message":"rate limited","code":429}}"#,
    )
        .into_response()
}

async fn slow_headers(
    State(state): State<UpstreamState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.record("slow", &headers, &body);
    tokio::time::sleep(Duration::from_secs(30)).await;
    sse(Body::from("data: [DONE]\n\n"))
}

async fn broken_stream(
    State(state): State<UpstreamState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.record("broken", &headers, &body);
    sse(Body::from(BROKEN_STREAM))
}

/// Sends one content frame, then keeps the connection open without data.
async fn stalled_stream(
    State(state): State<UpstreamState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.record("stall", &headers, &body);
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(4);
    tokio::spawn(async move {
        let first = Bytes::from_static(
            b"data: {\"id\":\"gen-stall\",\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
        );
        if tx.send(Ok(first)).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(tx);
    });
    sse(Body::from_stream(ChannelBody(rx)))
}

struct ChannelBody(mpsc::Receiver<Result<Bytes, std::io::Error>>);

impl Stream for ChannelBody {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}

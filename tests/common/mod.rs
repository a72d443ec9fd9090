//! Shared utilities for integration testing.

use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    Router,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// One request seen by the mock Data Plane API.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

impl RecordedRequest {
    #[allow(dead_code)]
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

pub type Responder = Arc<dyn Fn(&RecordedRequest) -> (u16, String) + Send + Sync>;

#[derive(Clone)]
struct MockState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responder: Responder,
}

/// Programmable mock of the Data Plane API on an ephemeral port.
pub struct MockDataPlane {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

#[allow(dead_code)]
impl MockDataPlane {
    /// Start with a responder that behaves like a healthy Data Plane API.
    pub async fn start() -> Self {
        Self::start_with(happy_path).await
    }

    /// Start with a custom responder.
    pub async fn start_with<F>(responder: F) -> Self
    where
        F: Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            requests: requests.clone(),
            responder: Arc::new(responder),
        };
        let app = Router::new().fallback(handle).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests matching `method`, in order.
    pub fn requests_with(&self, method: &str) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.method == method).collect()
    }
}

async fn handle(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let request = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    };
    state.requests.lock().unwrap().push(request.clone());

    let (status, body) = (state.responder)(&request);
    (StatusCode::from_u16(status).unwrap(), body)
}

/// Responses of a healthy Data Plane API at configuration version 1.
pub fn happy_path(request: &RecordedRequest) -> (u16, String) {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/v3/services/haproxy/configuration/version") => (200, "1".into()),
        ("POST", "/v3/services/haproxy/transactions") => (201, r#"{"id":"tx-1","status":"in_progress"}"#.into()),
        ("PUT", p) if p.starts_with("/v3/services/haproxy/transactions/") => (202, r#"{"status":"success"}"#.into()),
        ("DELETE", p) if p.starts_with("/v3/services/haproxy/transactions/") => (204, String::new()),
        (_, p) if p.starts_with("/v3/services/haproxy/configuration/backends/") => (200, request.body.clone()),
        _ => (404, r#"{"message":"not found"}"#.into()),
    }
}

/// Poll `cond` until it holds or a few seconds pass.
#[allow(dead_code)]
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

//! HTTP client for the HAProxy Data Plane API (v3).
//!
//! # Responsibilities
//! - Fetch the configuration version and open transactions against it
//! - Upsert servers (PUT, falling back to POST when the server is unknown)
//! - Tune backend-level checks, commit and abort transactions
//! - Attach bearer or basic credentials and bound every call by a timeout

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::config::DataPlaneConfig;
use crate::dataplane::error::{DataPlaneError, DataPlaneResult};
use crate::dataplane::types::{BackendServerSpec, HealthCheckPolicy, TransactionId};
use crate::dataplane::ControlPlane;
use crate::observability::metrics;

/// Upper bound on how much of an error body is kept.
pub const MAX_ERROR_BODY_BYTES: usize = 4 << 10;

const MAX_VERSION_BODY_BYTES: usize = 32 << 10;

/// Credentials attached to every request.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum DataPlaneAuth {
    #[default]
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

impl DataPlaneAuth {
    /// A token wins over username/password; empty values count as absent.
    pub fn from_credentials(token: Option<&str>, username: Option<&str>, password: Option<&str>) -> Self {
        let present = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_string);
        if let Some(token) = present(token) {
            return DataPlaneAuth::Bearer(token);
        }
        match (present(username), present(password)) {
            (None, None) => DataPlaneAuth::None,
            (username, password) => DataPlaneAuth::Basic {
                username: username.unwrap_or_default(),
                password: password.unwrap_or_default(),
            },
        }
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            DataPlaneAuth::None => request,
            DataPlaneAuth::Bearer(token) => request.bearer_auth(token),
            DataPlaneAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }
}

impl fmt::Debug for DataPlaneAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataPlaneAuth::None => f.write_str("None"),
            DataPlaneAuth::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            DataPlaneAuth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct VersionEnvelope {
    version: i64,
}

#[derive(Debug, Serialize, PartialEq)]
struct ServerPayload<'a> {
    name: &'a str,
    address: &'a str,
    port: i32,
    #[serde(skip_serializing_if = "is_zero")]
    weight: u32,
    check: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    send_proxy_v2: Option<&'static str>,
}

impl<'a> From<&'a BackendServerSpec> for ServerPayload<'a> {
    fn from(server: &'a BackendServerSpec) -> Self {
        Self {
            name: &server.name,
            address: &server.address,
            port: server.port,
            weight: server.weight,
            check: toggle(server.check),
            send_proxy_v2: server.send_proxy_v2.then_some("enabled"),
        }
    }
}

#[derive(Debug, Serialize)]
struct BackendPayload<'a> {
    name: &'a str,
    check_timeout: u64,
    default_server: DefaultServerPayload,
}

#[derive(Debug, Serialize)]
struct DefaultServerPayload {
    inter: u64,
    rise: u32,
    fall: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    send_proxy_v2: Option<&'static str>,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

fn toggle(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

/// Data Plane API client bound to one backend.
#[derive(Clone)]
pub struct DataPlaneClient {
    base_url: Url,
    api_prefix: Vec<String>,
    backend_name: String,
    auth: DataPlaneAuth,
    http: reqwest::Client,
}

impl DataPlaneClient {
    /// Create a client.
    ///
    /// # Arguments
    /// * `base_url` - Data Plane API root, e.g. `http://haproxy:5555`
    /// * `api_path` - version prefix, e.g. `/v3`
    /// * `backend_name` - HAProxy backend whose servers are managed
    /// * `auth` - credentials for every request
    /// * `timeout` - bound on every request, including reading the body
    pub fn new(
        base_url: &str,
        api_path: &str,
        backend_name: &str,
        auth: DataPlaneAuth,
        timeout: Duration,
    ) -> DataPlaneResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| DataPlaneError::Validation(format!("invalid data plane URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(DataPlaneError::Validation(format!("data plane URL '{}' cannot carry a path", base_url)));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DataPlaneError::Transport)?;

        Ok(Self {
            base_url,
            api_prefix: api_path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect(),
            backend_name: backend_name.to_string(),
            auth,
            http,
        })
    }

    pub fn from_config(config: &DataPlaneConfig, backend_name: &str) -> DataPlaneResult<Self> {
        let auth = DataPlaneAuth::from_credentials(
            config.token.as_deref(),
            config.username.as_deref(),
            config.password.as_deref(),
        );
        Self::new(
            &config.url,
            &config.api_path,
            backend_name,
            auth,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Read the current configuration version. Transactions are opened against it.
    pub async fn fetch_configuration_version(&self) -> DataPlaneResult<i64> {
        let url = self.endpoint(&["services", "haproxy", "configuration", "version"])?;
        let response = self.execute(self.request(Method::GET, url)).await?;
        let raw = read_limited(response, MAX_VERSION_BODY_BYTES).await?;
        decode_version(&raw)
    }

    fn endpoint(&self, segments: &[&str]) -> DataPlaneResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| DataPlaneError::Validation(format!("data plane URL '{}' cannot carry a path", self.base_url)))?;
            path.pop_if_empty();
            path.extend(&self.api_prefix);
            path.extend(segments);
        }
        Ok(url)
    }

    fn transaction_endpoint(&self, segments: &[&str], transaction: &TransactionId) -> DataPlaneResult<Url> {
        let mut url = self.endpoint(segments)?;
        url.query_pairs_mut().append_pair("transaction_id", transaction.as_str());
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.auth.apply(self.http.request(method, url))
    }

    async fn execute(&self, request: RequestBuilder) -> DataPlaneResult<Response> {
        let request = request.build().map_err(DataPlaneError::Transport)?;
        let method = request.method().clone();
        let path = request.url().path().to_string();

        let response = match self.http.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_dataplane_request(method.as_str(), 0);
                tracing::debug!(method = %method, path = %path, error = %e, "Data plane request failed");
                return Err(DataPlaneError::Transport(e));
            }
        };

        let status = response.status();
        metrics::record_dataplane_request(method.as_str(), status.as_u16());
        tracing::debug!(method = %method, path = %path, status = %status, "Data plane request");

        if status.as_u16() >= 300 {
            let body = read_limited(response, MAX_ERROR_BODY_BYTES).await.unwrap_or_default();
            return Err(DataPlaneError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(response)
    }

    fn servers_segments(&self) -> [&str; 6] {
        ["services", "haproxy", "configuration", "backends", self.backend_name.as_str(), "servers"]
    }
}

impl fmt::Debug for DataPlaneClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPlaneClient")
            .field("base_url", &self.base_url.as_str())
            .field("backend", &self.backend_name)
            .field("auth", &self.auth)
            .finish()
    }
}

#[async_trait]
impl ControlPlane for DataPlaneClient {
    async fn begin(&self) -> DataPlaneResult<TransactionId> {
        let version = self.fetch_configuration_version().await?;

        let mut url = self.endpoint(&["services", "haproxy", "transactions"])?;
        url.query_pairs_mut().append_pair("version", &version.to_string());
        let response = self.execute(self.request(Method::POST, url)).await?;

        let raw = response.bytes().await.map_err(DataPlaneError::Transport)?;
        let decoded: TransactionResponse = serde_json::from_slice(&raw)
            .map_err(|e| DataPlaneError::Protocol(format!("decode transaction response: {}", e)))?;
        if decoded.id.is_empty() {
            return Err(DataPlaneError::Protocol("empty transaction id".to_string()));
        }

        tracing::debug!(transaction_id = %decoded.id, version, "Transaction opened");
        Ok(TransactionId::new(decoded.id))
    }

    async fn apply_server(&self, transaction: &TransactionId, server: &BackendServerSpec) -> DataPlaneResult<()> {
        require_transaction(transaction)?;
        let payload = ServerPayload::from(server);

        let mut segments = self.servers_segments().to_vec();
        segments.push(&server.name);
        let update_url = self.transaction_endpoint(&segments, transaction)?;

        match self.execute(self.request(Method::PUT, update_url).json(&payload)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(server = %server.name, "Server not found, creating");
                let create_url = self.transaction_endpoint(&self.servers_segments(), transaction)?;
                self.execute(self.request(Method::POST, create_url).json(&payload)).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_health_check_policy(
        &self,
        transaction: &TransactionId,
        policy: &HealthCheckPolicy,
    ) -> DataPlaneResult<()> {
        require_transaction(transaction)?;
        let payload = BackendPayload {
            name: &self.backend_name,
            check_timeout: policy.check_timeout_ms(),
            default_server: DefaultServerPayload {
                inter: policy.check_timeout_ms(),
                rise: policy.rise,
                fall: policy.fall,
                send_proxy_v2: policy.send_proxy_v2.then_some("enabled"),
            },
        };

        let url = self.transaction_endpoint(
            &["services", "haproxy", "configuration", "backends", self.backend_name.as_str()],
            transaction,
        )?;
        self.execute(self.request(Method::PUT, url).json(&payload)).await?;
        Ok(())
    }

    async fn commit(&self, transaction: &TransactionId) -> DataPlaneResult<()> {
        require_transaction(transaction)?;
        let url = self.endpoint(&["services", "haproxy", "transactions", transaction.as_str()])?;
        self.execute(self.request(Method::PUT, url)).await?;
        Ok(())
    }

    async fn abort(&self, transaction: &TransactionId) -> DataPlaneResult<()> {
        require_transaction(transaction)?;
        let url = self.endpoint(&["services", "haproxy", "transactions", transaction.as_str()])?;
        self.execute(self.request(Method::DELETE, url)).await?;
        Ok(())
    }
}

fn require_transaction(transaction: &TransactionId) -> DataPlaneResult<()> {
    if transaction.is_empty() {
        return Err(DataPlaneError::Validation("empty transaction id".to_string()));
    }
    Ok(())
}

async fn read_limited(mut response: Response, limit: usize) -> DataPlaneResult<Vec<u8>> {
    let mut buf = Vec::new();
    while buf.len() < limit {
        match response.chunk().await.map_err(DataPlaneError::Transport)? {
            Some(chunk) => buf.extend_from_slice(&chunk),
            None => break,
        }
    }
    buf.truncate(limit);
    Ok(buf)
}

/// Accepts a bare positive integer or `{"version": N}`.
fn decode_version(raw: &[u8]) -> DataPlaneResult<i64> {
    if let Ok(version) = serde_json::from_slice::<i64>(raw) {
        if version > 0 {
            return Ok(version);
        }
    }
    if let Ok(envelope) = serde_json::from_slice::<VersionEnvelope>(raw) {
        if envelope.version > 0 {
            return Ok(envelope.version);
        }
    }
    Err(DataPlaneError::Protocol(format!(
        "unexpected version payload: {}",
        String::from_utf8_lossy(raw).trim()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> DataPlaneClient {
        DataPlaneClient::new(base, "/v3", "ingress", DataPlaneAuth::None, Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn test_decode_version() {
        assert_eq!(decode_version(b"42").unwrap(), 42);
        assert_eq!(decode_version(b"42\n").unwrap(), 42);
        assert_eq!(decode_version(br#"{"version": 7}"#).unwrap(), 7);

        for bad in [&b"0"[..], b"-3", br#"{"version": 0}"#, br#"{"other": 1}"#, b"garbage", b""] {
            let err = decode_version(bad).unwrap_err();
            assert!(matches!(err, DataPlaneError::Protocol(_)), "payload {:?}", bad);
        }
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let c = client("http://haproxy:5555/dataplane/");
        let url = c.endpoint(&["services", "haproxy", "transactions"]).unwrap();
        assert_eq!(url.as_str(), "http://haproxy:5555/dataplane/v3/services/haproxy/transactions");

        let c = client("http://haproxy:5555");
        let tx = TransactionId::new("abc-123");
        let url = c.transaction_endpoint(&c.servers_segments(), &tx).unwrap();
        assert_eq!(
            url.as_str(),
            "http://haproxy:5555/v3/services/haproxy/configuration/backends/ingress/servers?transaction_id=abc-123"
        );
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        let err = DataPlaneClient::new("not a url", "/v3", "b", DataPlaneAuth::None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, DataPlaneError::Validation(_)));

        let err = DataPlaneClient::new("mailto:ops@example.com", "/v3", "b", DataPlaneAuth::None, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, DataPlaneError::Validation(_)));
    }

    #[test]
    fn test_server_payload() {
        let server = BackendServerSpec {
            name: "node1-8080".into(),
            address: "192.168.0.5".into(),
            port: 8080,
            weight: 1,
            check: true,
            send_proxy_v2: false,
        };
        let value = serde_json::to_value(ServerPayload::from(&server)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "name": "node1-8080",
                "address": "192.168.0.5",
                "port": 8080,
                "weight": 1,
                "check": "enabled",
            })
        );

        let proxied = BackendServerSpec { send_proxy_v2: true, check: false, ..server };
        let value = serde_json::to_value(ServerPayload::from(&proxied)).unwrap();
        assert_eq!(value["send_proxy_v2"], "enabled");
        assert_eq!(value["check"], "disabled");
    }

    #[test]
    fn test_auth_from_credentials() {
        assert_eq!(
            DataPlaneAuth::from_credentials(Some("tok"), Some("admin"), Some("pw")),
            DataPlaneAuth::Bearer("tok".into())
        );
        assert_eq!(
            DataPlaneAuth::from_credentials(Some(""), Some("admin"), None),
            DataPlaneAuth::Basic { username: "admin".into(), password: String::new() }
        );
        assert_eq!(DataPlaneAuth::from_credentials(None, Some(""), None), DataPlaneAuth::None);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let auth = DataPlaneAuth::Basic { username: "admin".into(), password: "hunter2".into() };
        let rendered = format!("{:?}", auth);
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
        assert!(!format!("{:?}", DataPlaneAuth::Bearer("secret".into())).contains("secret"));
    }
}

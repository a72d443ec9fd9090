//! Data Plane API client against a mock server.

use std::time::Duration;

use haproxy_endpoint_sync::dataplane::{
    BackendServerSpec, ControlPlane, DataPlaneAuth, DataPlaneClient, DataPlaneError, ErrorKind, HealthCheckPolicy,
    TransactionId,
};

mod common;

use common::{happy_path, MockDataPlane, RecordedRequest};

fn client(mock: &MockDataPlane, auth: DataPlaneAuth) -> DataPlaneClient {
    DataPlaneClient::new(&mock.url(), "/v3", "ingress", auth, Duration::from_secs(5)).unwrap()
}

fn server(name: &str, proxy: bool) -> BackendServerSpec {
    BackendServerSpec {
        name: name.into(),
        address: "192.168.0.5".into(),
        port: 30080,
        weight: 1,
        check: true,
        send_proxy_v2: proxy,
    }
}

#[tokio::test]
async fn test_begin_uses_current_version() {
    let mock = MockDataPlane::start().await;
    let tx = client(&mock, DataPlaneAuth::None).begin().await.unwrap();

    assert_eq!(tx, TransactionId::new("tx-1"));
    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/v3/services/haproxy/configuration/version");
    assert_eq!(requests[1].method, "POST");
    assert_eq!(requests[1].path, "/v3/services/haproxy/transactions");
    assert_eq!(requests[1].query.as_deref(), Some("version=1"));
}

#[tokio::test]
async fn test_version_envelope_is_accepted() {
    let mock = MockDataPlane::start_with(|r: &RecordedRequest| {
        if r.path.ends_with("/configuration/version") {
            (200, r#"{"version": 17}"#.into())
        } else {
            happy_path(r)
        }
    })
    .await;

    client(&mock, DataPlaneAuth::None).begin().await.unwrap();
    assert_eq!(mock.requests_with("POST")[0].query.as_deref(), Some("version=17"));
}

#[tokio::test]
async fn test_missing_version_is_protocol_error() {
    let mock = MockDataPlane::start_with(|r: &RecordedRequest| {
        if r.path.ends_with("/configuration/version") {
            (200, "{}".into())
        } else {
            happy_path(r)
        }
    })
    .await;

    let err = client(&mock, DataPlaneAuth::None).begin().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(mock.requests_with("POST").is_empty());
}

#[tokio::test]
async fn test_empty_transaction_id_is_protocol_error() {
    let mock = MockDataPlane::start_with(|r: &RecordedRequest| {
        if r.method == "POST" {
            (201, r#"{"id":""}"#.into())
        } else {
            happy_path(r)
        }
    })
    .await;

    let err = client(&mock, DataPlaneAuth::None).begin().await.unwrap_err();
    assert!(matches!(err, DataPlaneError::Protocol(_)), "{}", err);
}

#[tokio::test]
async fn test_upsert_updates_existing_server() {
    let mock = MockDataPlane::start().await;
    let tx = TransactionId::new("tx-1");

    client(&mock, DataPlaneAuth::None)
        .apply_server(&tx, &server("node1-30080", false))
        .await
        .unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "PUT");
    assert_eq!(requests[0].path, "/v3/services/haproxy/configuration/backends/ingress/servers/node1-30080");
    assert_eq!(requests[0].query.as_deref(), Some("transaction_id=tx-1"));
    assert_eq!(
        requests[0].json(),
        serde_json::json!({
            "name": "node1-30080",
            "address": "192.168.0.5",
            "port": 30080,
            "weight": 1,
            "check": "enabled"
        })
    );
}

#[tokio::test]
async fn test_upsert_falls_back_to_create() {
    let mock = MockDataPlane::start_with(|r: &RecordedRequest| {
        if r.method == "PUT" && r.path.contains("/servers/") {
            (404, r#"{"code":404,"message":"server not found"}"#.into())
        } else {
            happy_path(r)
        }
    })
    .await;
    let tx = TransactionId::new("tx-1");

    client(&mock, DataPlaneAuth::None)
        .apply_server(&tx, &server("node1-30080", true))
        .await
        .unwrap();

    let puts = mock.requests_with("PUT");
    let posts = mock.requests_with("POST");
    assert_eq!(puts.len(), 1);
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].path, "/v3/services/haproxy/configuration/backends/ingress/servers");
    assert_eq!(posts[0].query.as_deref(), Some("transaction_id=tx-1"));
    assert_eq!(posts[0].json(), puts[0].json());
    assert_eq!(posts[0].json()["send_proxy_v2"], "enabled");
}

#[tokio::test]
async fn test_upsert_does_not_create_on_other_errors() {
    let mock = MockDataPlane::start_with(|r: &RecordedRequest| {
        if r.method == "PUT" {
            (409, "version mismatch".into())
        } else {
            happy_path(r)
        }
    })
    .await;

    let err = client(&mock, DataPlaneAuth::None)
        .apply_server(&TransactionId::new("tx-1"), &server("a-80", false))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(409));
    assert_eq!(err.to_string(), "status 409: version mismatch");
    assert!(mock.requests_with("POST").is_empty());
}

#[tokio::test]
async fn test_health_check_policy_payload() {
    let mock = MockDataPlane::start().await;
    let policy = HealthCheckPolicy {
        interval_secs: 3,
        rise: 4,
        fall: 5,
        send_proxy_v2: true,
    };

    client(&mock, DataPlaneAuth::None)
        .apply_health_check_policy(&TransactionId::new("tx-1"), &policy)
        .await
        .unwrap();

    let request = &mock.requests()[0];
    assert_eq!(request.method, "PUT");
    assert_eq!(request.path, "/v3/services/haproxy/configuration/backends/ingress");
    assert_eq!(
        request.json(),
        serde_json::json!({
            "name": "ingress",
            "check_timeout": 3000,
            "default_server": {"inter": 3000, "rise": 4, "fall": 5, "send_proxy_v2": "enabled"}
        })
    );
}

#[tokio::test]
async fn test_commit_and_abort_paths() {
    let mock = MockDataPlane::start().await;
    let c = client(&mock, DataPlaneAuth::None);
    let tx = TransactionId::new("tx-9");

    c.commit(&tx).await.unwrap();
    c.abort(&tx).await.unwrap();

    let requests = mock.requests();
    assert_eq!((requests[0].method.as_str(), requests[0].path.as_str()), ("PUT", "/v3/services/haproxy/transactions/tx-9"));
    assert_eq!((requests[1].method.as_str(), requests[1].path.as_str()), ("DELETE", "/v3/services/haproxy/transactions/tx-9"));
}

#[tokio::test]
async fn test_empty_transaction_is_rejected_locally() {
    let mock = MockDataPlane::start().await;
    let err = client(&mock, DataPlaneAuth::None)
        .commit(&TransactionId::new(""))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_error_body_is_truncated() {
    let mock = MockDataPlane::start_with(|_: &RecordedRequest| (500, "x".repeat(10_000))).await;

    let err = client(&mock, DataPlaneAuth::None).commit(&TransactionId::new("tx-1")).await.unwrap_err();
    match err {
        DataPlaneError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body.len(), 4096);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_credentials_are_sent() {
    let mock = MockDataPlane::start().await;

    client(&mock, DataPlaneAuth::Bearer("t0ken".into())).fetch_configuration_version().await.unwrap();
    client(
        &mock,
        DataPlaneAuth::Basic {
            username: "admin".into(),
            password: "secret".into(),
        },
    )
    .fetch_configuration_version()
    .await
    .unwrap();
    client(&mock, DataPlaneAuth::None).fetch_configuration_version().await.unwrap();

    let auth: Vec<_> = mock.requests().into_iter().map(|r| r.authorization).collect();
    assert_eq!(
        auth,
        vec![Some("Bearer t0ken".to_string()), Some("Basic YWRtaW46c2VjcmV0".to_string()), None]
    );
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let c = DataPlaneClient::new(
        &format!("http://{}", addr),
        "/v3",
        "ingress",
        DataPlaneAuth::None,
        Duration::from_secs(2),
    )
    .unwrap();
    let err = c.begin().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

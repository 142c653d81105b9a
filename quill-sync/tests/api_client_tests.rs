use quill_sync::{PushOutcome, RemoteApiClient, SyncConfig, SyncError};
use quill_types::{DeviceId, EntityId, OperationKind, QueueOperation};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> SyncConfig {
    SyncConfig {
        api_base_url: server.uri(),
        request_timeout_secs: 2,
        ..SyncConfig::default()
    }
}

fn make_op() -> QueueOperation {
    QueueOperation::new(
        OperationKind::Update,
        "pages",
        EntityId::new(),
        json!({"title": "hello"}),
        "key-1",
        DeviceId::new(),
    )
    .with_base_version(3, None)
}

#[tokio::test]
async fn push_commits_on_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/writes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": 4})))
        .expect(1)
        .mount(&server)
        .await;

    let client = RemoteApiClient::new(config_for(&server)).unwrap();
    let outcome = client.push_write(&make_op()).await.unwrap();
    assert_eq!(outcome, PushOutcome::Committed { version: 4 });
}

#[tokio::test]
async fn push_surfaces_conflicts_as_outcomes_not_errors() {
    let server = MockServer::start().await;
    let current = json!({"title": "their edit"});
    Mock::given(method("POST"))
        .and(path("/api/writes"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "current_version": 9,
            "current_content": current,
        })))
        .mount(&server)
        .await;

    let client = RemoteApiClient::new(config_for(&server)).unwrap();
    let outcome = client.push_write(&make_op()).await.unwrap();
    assert_eq!(
        outcome,
        PushOutcome::Conflict {
            current_version: 9,
            current_content: current,
        }
    );
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/writes"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = RemoteApiClient::new(config_for(&server)).unwrap();
    let err = client.push_write(&make_op()).await.unwrap_err();
    assert!(matches!(err, SyncError::TransientNetwork(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn request_timeout_status_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/writes"))
        .respond_with(ResponseTemplate::new(408))
        .mount(&server)
        .await;

    let client = RemoteApiClient::new(config_for(&server)).unwrap();
    let err = client.push_write(&make_op()).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn client_errors_are_validation_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/writes"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown resource table"))
        .mount(&server)
        .await;

    let client = RemoteApiClient::new(config_for(&server)).unwrap();
    let err = client.push_write(&make_op()).await.unwrap_err();
    let SyncError::Validation(msg) = err else {
        panic!("4xx should map to a validation error");
    };
    assert!(msg.contains("unknown resource table"));
}

#[tokio::test]
async fn unreachable_host_is_transient() {
    // Nothing listens on this port.
    let config = SyncConfig {
        api_base_url: "http://127.0.0.1:1".to_string(),
        request_timeout_secs: 1,
        ..SyncConfig::default()
    };
    let client = RemoteApiClient::new(config).unwrap();
    let err = client.push_write(&make_op()).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn probe_measures_round_trip_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = RemoteApiClient::new(config_for(&server)).unwrap();
    let rtt = client.probe().await.unwrap();
    assert!(rtt < std::time::Duration::from_secs(2));
}

#[tokio::test]
async fn probe_failure_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = RemoteApiClient::new(config_for(&server)).unwrap();
    assert!(client.probe().await.unwrap_err().is_transient());
}

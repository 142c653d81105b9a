use quill_sync::{classify, ConnectionQuality, NetworkMonitor, RemoteApiClient, SyncConfig};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn classification_thresholds() {
    assert_eq!(
        classify(Some(Duration::from_millis(20))),
        ConnectionQuality::Good
    );
    assert_eq!(
        classify(Some(Duration::from_millis(99))),
        ConnectionQuality::Good
    );
    assert_eq!(
        classify(Some(Duration::from_millis(100))),
        ConnectionQuality::Degraded
    );
    assert_eq!(
        classify(Some(Duration::from_millis(499))),
        ConnectionQuality::Degraded
    );
    assert_eq!(
        classify(Some(Duration::from_millis(500))),
        ConnectionQuality::Offline
    );
    assert_eq!(classify(None), ConnectionQuality::Offline);
}

#[tokio::test]
async fn monitor_assumes_good_until_probed() {
    let config = SyncConfig {
        api_base_url: "http://127.0.0.1:1".to_string(),
        request_timeout_secs: 1,
        ..SyncConfig::default()
    };
    let api = Arc::new(RemoteApiClient::new(config).unwrap());
    let monitor = NetworkMonitor::new(api);
    assert_eq!(monitor.quality(), ConnectionQuality::Good);
    assert!(monitor.is_reachable());
    assert!(monitor.last_probe_at().is_none());
}

#[tokio::test]
async fn probe_against_a_live_endpoint_is_reachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = SyncConfig {
        api_base_url: server.uri(),
        request_timeout_secs: 2,
        ..SyncConfig::default()
    };
    let api = Arc::new(RemoteApiClient::new(config).unwrap());
    let mut monitor = NetworkMonitor::new(api);

    let quality = monitor.probe_once().await;
    assert_ne!(quality, ConnectionQuality::Offline);
    assert!(monitor.is_reachable());
    assert!(monitor.last_probe_at().is_some());
}

#[tokio::test]
async fn failed_probe_marks_the_backend_offline() {
    let config = SyncConfig {
        api_base_url: "http://127.0.0.1:1".to_string(),
        request_timeout_secs: 1,
        ..SyncConfig::default()
    };
    let api = Arc::new(RemoteApiClient::new(config).unwrap());
    let mut monitor = NetworkMonitor::new(api);

    let quality = monitor.probe_once().await;
    assert_eq!(quality, ConnectionQuality::Offline);
    assert!(!monitor.is_reachable());
}

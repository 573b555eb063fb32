//! Integration tests for the HTTP PURGE trigger endpoint over a real socket

use edge_purge::{
    CoordinatorSettings, EdgeCacheClient, PurgeCoordinator, PurgeHandler, PurgeResponse,
};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    base: String,
    coordinator: PurgeCoordinator,
    provider: MockServer,
    shutdown: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<edge_purge::Result<()>>,
}

async fn start(background: bool, auth: Option<&str>) -> Harness {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "errors": [],
            "result": { "id": "purge-id" }
        })))
        .mount(&provider)
        .await;

    let client = EdgeCacheClient::new("test-token", "zone123", provider.uri()).unwrap();
    let coordinator = PurgeCoordinator::new(
        Arc::new(client),
        CoordinatorSettings {
            batch_size: 30,
            delay: Duration::from_secs(60),
            background_default: background,
        },
    );

    let mut handler = PurgeHandler::new(coordinator.clone(), "https://www.example.com");
    if let Some(token) = auth {
        handler = handler.with_auth(token.to_string());
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let server = tokio::spawn(Arc::new(handler).serve(listener, async move {
        let _ = rx.await;
    }));

    Harness {
        base: format!("http://{}", addr),
        coordinator,
        provider,
        shutdown: Some(tx),
        server,
    }
}

fn purge_method() -> Method {
    Method::from_bytes(b"PURGE").unwrap()
}

#[tokio::test]
async fn test_purge_request_is_queued() {
    let harness = start(true, None).await;
    let client = reqwest::Client::new();

    let response = client
        .request(purge_method(), format!("{}/blog/post-1/", harness.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    let body: PurgeResponse = response.json().await.unwrap();
    assert!(body.success);
    assert!(body.queued);
    assert_eq!(body.url.as_deref(), Some("https://www.example.com/blog/post-1/"));
    assert_eq!(
        harness.coordinator.pending_urls(),
        vec!["https://www.example.com/blog/post-1/"]
    );
}

#[tokio::test]
async fn test_synchronous_purge_reaches_provider() {
    let harness = start(false, Some("secret")).await;
    let client = reqwest::Client::new();

    let response = client
        .request(purge_method(), format!("{}/about/", harness.base))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: PurgeResponse = response.json().await.unwrap();
    assert_eq!(body.purged_count, 1);
    assert_eq!(harness.provider.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unauthorized_and_wrong_method() {
    let harness = start(true, Some("secret")).await;
    let client = reqwest::Client::new();

    let response = client
        .request(purge_method(), format!("{}/about/", harness.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .post(format!("{}/about/", harness.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);

    assert!(harness.coordinator.pending_urls().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_server() {
    let mut harness = start(true, None).await;

    if let Some(tx) = harness.shutdown.take() {
        tx.send(()).unwrap();
    }
    let result = tokio::time::timeout(Duration::from_secs(5), harness.server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

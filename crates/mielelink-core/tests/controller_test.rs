#![allow(clippy::unwrap_used)]
// End-to-end tests for `Controller` against a wiremock cloud.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mielelink_api::OAuthCredentials;
use mielelink_core::{
    CommandOutcome, Controller, CoreError, FeedMode, MemoryStateTree, ServiceConfig,
    ServiceStatus, StateSink,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn credentials() -> OAuthCredentials {
    OAuthCredentials {
        client_id: "client-id".into(),
        client_secret: SecretString::from("client-secret".to_string()),
        username: "user@example.com".into(),
        password: SecretString::from("hunter2".to_string()),
        country: "de-DE".into(),
    }
}

fn config(server: &MockServer, feed: FeedMode) -> ServiceConfig {
    let mut config = ServiceConfig::new(server.uri().parse().unwrap(), credentials(), "en");
    config.feed = feed;
    config
}

fn polling() -> FeedMode {
    FeedMode::Polling {
        interval: Duration::from_secs(60),
    }
}

fn washer() -> Value {
    json!({
        "D1": {
            "ident": {
                "type": { "value_raw": 1, "value_localized": "Washing machine" },
                "deviceName": "Laundry"
            },
            "state": {
                "status": { "value_raw": 1, "value_localized": "Off" }
            }
        }
    })
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/thirdparty/token/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "DE_access",
            "refresh_token": "DE_refresh",
            "token_type": "Bearer",
            "expires_in": 2_592_000
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/thirdparty/logout/"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_devices(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/devices/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(washer()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/D1/actions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "powerOn": true })))
        .mount(server)
        .await;
}

/// Wait until `path` holds a value, or panic after a few seconds.
async fn value_eventually(tree: &MemoryStateTree, path: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(value) = tree.value(path) {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{path} never appeared"))
}

/// Wait until `path` holds `expected`, or panic after a few seconds.
async fn value_becomes(tree: &MemoryStateTree, path: &str, expected: Value) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while tree.value(path).as_ref() != Some(&expected) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{path} never became {expected}, last {:?}", tree.value(path)));
}

async fn connected_eventually(tree: &MemoryStateTree) {
    let mut connected = tree.watch_connection();
    tokio::time::timeout(Duration::from_secs(5), connected.wait_for(|c| *c))
        .await
        .expect("connection indicator never turned on")
        .unwrap();
}

// ── Polling ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_polling_run_mirrors_devices() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_devices(&server).await;

    let tree = Arc::new(MemoryStateTree::new());
    let controller = Controller::new(
        config(&server, polling()),
        Arc::clone(&tree) as Arc<dyn StateSink>,
    );
    controller.connect().await.unwrap();
    assert_eq!(*controller.status().borrow(), ServiceStatus::Running);

    assert_eq!(value_eventually(&tree, "D1.Status").await, json!("Off"));
    assert_eq!(
        value_eventually(&tree, "D1.ACTIONS.Nickname").await,
        json!("Laundry")
    );
    connected_eventually(&tree).await;

    controller.shutdown().await;
    assert_eq!(*controller.status().borrow(), ServiceStatus::Stopped);
    assert!(!tree.is_connected());
    server.verify().await;
}

#[tokio::test]
async fn test_dispatch_records_success_text() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_devices(&server).await;
    Mock::given(method("PUT"))
        .and(path("/v1/devices/D1/actions"))
        .and(body_string_contains("powerOff"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let tree = Arc::new(MemoryStateTree::new());
    let controller = Controller::new(
        config(&server, polling()),
        Arc::clone(&tree) as Arc<dyn StateSink>,
    );
    controller.connect().await.unwrap();
    value_eventually(&tree, "D1.Status").await;

    let outcome = controller.dispatch("D1", "Power", json!(false)).await.unwrap();
    assert!(matches!(outcome, CommandOutcome::Applied { .. }));
    value_becomes(&tree, "D1.ACTIONS.LastActionResult", json!("Okay!")).await;

    controller.shutdown().await;
}

#[tokio::test]
async fn test_rejected_write_is_recorded_verbatim() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_devices(&server).await;
    Mock::given(method("PUT"))
        .and(path("/v1/devices/D1/actions"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "message": "Device is busy" })),
        )
        .mount(&server)
        .await;

    let tree = Arc::new(MemoryStateTree::new());
    let controller = Controller::new(
        config(&server, polling()),
        Arc::clone(&tree) as Arc<dyn StateSink>,
    );
    controller.connect().await.unwrap();
    value_eventually(&tree, "D1.Status").await;

    let outcome = controller.dispatch("D1", "Nickname", json!("Utility")).await.unwrap();
    assert!(matches!(outcome, CommandOutcome::Failed { .. }));
    value_becomes(&tree, "D1.ACTIONS.LastActionResult", json!("Device is busy")).await;

    controller.shutdown().await;
}

#[tokio::test]
async fn test_host_write_is_dispatched() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_devices(&server).await;
    Mock::given(method("PUT"))
        .and(path("/v1/devices/D1/actions"))
        .and(body_string_contains("powerOff"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let tree = Arc::new(MemoryStateTree::new());
    let controller = Controller::new(
        config(&server, polling()),
        Arc::clone(&tree) as Arc<dyn StateSink>,
    );
    controller.connect().await.unwrap();
    value_eventually(&tree, "D1.ACTIONS.Power").await;

    tree.write("D1.ACTIONS.Power", json!(false)).unwrap();
    value_becomes(&tree, "D1.ACTIONS.LastActionResult", json!("Okay!")).await;

    controller.shutdown().await;
}

// ── Login ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refused_credentials_fail_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/thirdparty/token/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let tree = Arc::new(MemoryStateTree::new());
    let controller = Controller::new(
        config(&server, polling()),
        Arc::clone(&tree) as Arc<dyn StateSink>,
    );

    let result = controller.connect().await;
    assert!(matches!(result, Err(CoreError::AuthError { .. })));
    assert!(matches!(
        *controller.status().borrow(),
        ServiceStatus::Failed(_)
    ));
    assert!(matches!(
        controller.dispatch("D1", "Power", json!(true)).await,
        Err(CoreError::NotRunning)
    ));
    assert!(!tree.is_connected());
}

// ── Event stream ────────────────────────────────────────────────────

#[tokio::test]
async fn test_event_stream_feeds_the_tree() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let body = format!(
        "event: devices\ndata: {}\n\nevent: actions\ndata: {}\n\n",
        washer(),
        json!({ "D1": { "powerOn": true } })
    );
    Mock::given(method("GET"))
        .and(path("/v1/devices/all/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let tree = Arc::new(MemoryStateTree::new());
    let controller = Controller::new(
        config(&server, FeedMode::EventStream),
        Arc::clone(&tree) as Arc<dyn StateSink>,
    );
    controller.connect().await.unwrap();

    assert_eq!(value_eventually(&tree, "D1.Status").await, json!("Off"));

    controller.shutdown().await;
    assert!(!tree.is_connected());
}

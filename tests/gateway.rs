//! HTTP gateway tests, driven through the router without a socket.

mod common;

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use deepsea::config::{GatewayConfig, IndexConfig};
use deepsea::error::Result;
use deepsea::gateway::{Gateway, IssuedKey, Publisher, request_payload, sign};
use deepsea::index::CommitIndex;
use deepsea::packet::Packet;
use deepsea::server::{AppState, KEY_HEADER, SIGNATURE_HEADER, create_router};
use deepsea::store::{CommitStore, GatewayStore, SqliteCommitStore, SqliteGatewayStore};

use common::sample_packet;

#[derive(Default)]
struct RecordingPublisher {
    posts: Mutex<Vec<(String, String)>>,
}

impl Publisher for RecordingPublisher {
    fn publish(&self, packet: &Packet, channel: &str) -> Result<bool> {
        self.posts
            .lock()
            .unwrap()
            .push((packet.repo_name.clone(), channel.to_string()));
        Ok(true)
    }
}

struct TestGateway {
    _temp: TempDir,
    router: Router,
    gateway: Arc<Gateway>,
    index: Arc<CommitIndex>,
    publisher: Arc<RecordingPublisher>,
}

impl TestGateway {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();

        let gateway_store = SqliteGatewayStore::new(temp.path().join("gateway.db")).unwrap();
        gateway_store.initialize().unwrap();
        let commit_store = SqliteCommitStore::new(temp.path().join("commits.db")).unwrap();
        commit_store.initialize().unwrap();

        let publisher = Arc::new(RecordingPublisher::default());
        let gateway = Arc::new(Gateway::new(
            Arc::new(gateway_store),
            publisher.clone(),
            GatewayConfig::default(),
        ));
        let index = Arc::new(CommitIndex::new(
            Arc::new(commit_store),
            IndexConfig::default(),
        ));
        let router = create_router(Arc::new(AppState::new(gateway.clone(), index.clone())));

        Self {
            _temp: temp,
            router,
            gateway,
            index,
            publisher,
        }
    }

    fn key(&self, quota: i64) -> IssuedKey {
        self.gateway.issue_key("alice", Some(quota)).unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn signed(
        &self,
        key: &IssuedKey,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let signature = sign(
            &key.secret,
            &request_payload(method, path, body.as_bytes()),
        )
        .unwrap();
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(KEY_HEADER, &key.key_id)
            .header(SIGNATURE_HEADER, signature)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    async fn publish(&self, key: &IssuedKey, packet: &Packet) -> (StatusCode, Value) {
        self.signed(
            key,
            "POST",
            "/api/v1/publish",
            Some(json!({ "packet": packet })),
        )
        .await
    }
}

fn packet_len(packet: &Packet) -> i64 {
    packet.to_wire().unwrap().len() as i64
}

#[tokio::test]
async fn test_health() {
    let gw = TestGateway::new();
    let response = gw
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_publish_charges_quota_and_claims_name() {
    let gw = TestGateway::new();
    let key = gw.key(1_000_000);
    let packet = sample_packet("deep-sea", "Initial import");

    let (status, body) = gw.publish(&key, &packet).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["accepted"], true);
    assert_eq!(body["data"]["channel"], "alt.test");
    assert_eq!(body["data"]["bytes"], packet_len(&packet));

    assert_eq!(
        *gw.publisher.posts.lock().unwrap(),
        vec![("deep-sea".to_string(), "alt.test".to_string())]
    );
    let credential = gw.gateway.credential(&key.key_id).unwrap().unwrap();
    assert_eq!(credential.used_bytes, packet_len(&packet));

    let (status, body) = gw.signed(&key, "GET", "/api/v1/repos", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["repo_name"], "deep-sea");
}

#[tokio::test]
async fn test_publish_to_named_channel() {
    let gw = TestGateway::new();
    let key = gw.key(1_000_000);
    let packet = sample_packet("deep-sea", "m");

    let (status, _) = gw
        .signed(
            &key,
            "POST",
            "/api/v1/publish",
            Some(json!({ "packet": packet, "channel": "alt.binaries.test" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(gw.publisher.posts.lock().unwrap()[0].1, "alt.binaries.test");
}

#[tokio::test]
async fn test_rejections_are_distinguishable() {
    let gw = TestGateway::new();
    let key = gw.key(1_000_000);
    let packet = sample_packet("deep-sea", "m");

    let forged = IssuedKey {
        secret: "not-the-secret".to_string(),
        ..key.clone()
    };
    let (status, body) = gw.publish(&forged, &packet).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Signature mismatch");

    gw.gateway.revoke_key(&key.key_id).unwrap();
    let (status, body) = gw.publish(&key, &packet).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid or inactive key");

    let request = Request::post("/api/v1/publish")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = gw.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Missing API key");

    assert!(gw.publisher.posts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_signature_covers_the_path() {
    let gw = TestGateway::new();
    let key = gw.key(1_000_000);

    let signature = sign(&key.secret, &request_payload("GET", "/api/v1/commits", b"")).unwrap();
    let request = Request::get("/api/v1/repos")
        .header(KEY_HEADER, &key.key_id)
        .header(SIGNATURE_HEADER, signature)
        .body(Body::empty())
        .unwrap();
    let (status, _) = gw.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_quota_cutoff() {
    let gw = TestGateway::new();
    let packet = sample_packet("deep-sea", "m");
    let key = gw.key(packet_len(&packet));

    let (status, _) = gw.publish(&key, &packet).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = gw.publish(&key, &packet).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Quota exceeded");
    assert_eq!(gw.publisher.posts.lock().unwrap().len(), 1);

    // Bookkeeping still works for an exhausted key.
    let (status, _) = gw.signed(&key, "GET", "/api/v1/repos", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_packet_is_bad_request() {
    let gw = TestGateway::new();
    let key = gw.key(1_000_000);

    let mut packet = sample_packet("deep-sea", "m");
    packet.schema_version = "9.9.9".to_string();
    let (status, _) = gw.publish(&key, &packet).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = gw
        .signed(&key, "POST", "/api/v1/publish", Some(json!({ "nope": 1 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let credential = gw.gateway.credential(&key.key_id).unwrap().unwrap();
    assert_eq!(credential.used_bytes, 0);
}

#[tokio::test]
async fn test_credentials_checked_before_the_body() {
    let gw = TestGateway::new();
    let key = gw.key(1_000_000);
    let stranger = IssuedKey {
        key_id: "ds_key_000000000000".to_string(),
        ..key.clone()
    };

    let (status, body) = gw
        .signed(&stranger, "POST", "/api/v1/publish", Some(json!({ "nope": 1 })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid or inactive key");

    let request = Request::post("/api/v1/publish")
        .header(KEY_HEADER, &key.key_id)
        .header(SIGNATURE_HEADER, "00")
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = gw.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Signature mismatch");
}

#[tokio::test]
async fn test_rename_and_release() {
    let gw = TestGateway::new();
    let key = gw.key(1_000_000);
    gw.publish(&key, &sample_packet("one", "m")).await;
    gw.publish(&key, &sample_packet("two", "m")).await;

    let (status, body) = gw
        .signed(
            &key,
            "POST",
            "/api/v1/repos/one/rename",
            Some(json!({ "new_name": "two" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("two"));

    let (status, body) = gw
        .signed(
            &key,
            "POST",
            "/api/v1/repos/one/rename",
            Some(json!({ "new_name": "uno" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["new_name"], "uno");

    let (status, _) = gw
        .signed(
            &key,
            "POST",
            "/api/v1/repos/one/rename",
            Some(json!({ "new_name": "eins" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = gw.signed(&key, "DELETE", "/api/v1/repos/uno", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = gw.signed(&key, "DELETE", "/api/v1/repos/uno", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let names: Vec<_> = gw
        .gateway
        .list_owned_repos(&key.key_id)
        .unwrap()
        .into_iter()
        .map(|o| o.repo_name)
        .collect();
    assert_eq!(names, vec!["two"]);
}

#[tokio::test]
async fn test_commit_listing_is_public() {
    let gw = TestGateway::new();
    let packet = sample_packet("deep-sea", "Initial import");
    gw.index
        .ingest("alt.test:42", &packet.to_wire().unwrap())
        .unwrap();
    gw.index
        .ingest("alt.test:43", &sample_packet("other", "m").to_wire().unwrap())
        .unwrap();

    let (status, body) = gw
        .send(
            Request::get("/api/v1/commits?repo=deep-sea")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let commits = body["data"].as_array().unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0]["message_id"], "alt.test:42");
    assert!(commits[0].get("raw_packet").is_none());

    let (status, body) = gw
        .send(
            Request::get("/api/v1/commits/alt.test:42")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["files"], json!(["README.md", "src/main.rs"]));

    let (status, _) = gw
        .send(
            Request::get("/api/v1/commits/alt.test:1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

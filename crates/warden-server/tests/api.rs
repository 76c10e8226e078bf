use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::util::ServiceExt;
use warden_config::{Config, Generation, Platform, Server, Store as StoreConfig, StoreSeed};
use warden_contracts::{ConversationMember, OutgoingMessage, SavedPhoto, UploadedPhoto};
use warden_server::error::UpstreamError;
use warden_server::{build_app, build_app_with, GenerationClient, PlatformClient, Store};

fn test_config() -> Config {
    Config {
        server: Server {
            listen_addr: "127.0.0.1:0".to_string(),
        },
        platform: Platform {
            api_base: "http://platform.invalid/method".to_string(),
            api_version: "5.131".to_string(),
            access_token: "vk-token".to_string(),
            group_id: 218000000,
            secret: "callback-secret".to_string(),
            confirmation: "a1b2c3d4".to_string(),
            request_timeout_ms: 1_000,
            group_peer_threshold: 2_000_000_000,
        },
        generation: Generation {
            api_base: "http://generation.invalid/v1".to_string(),
            model: "text-davinci-003".to_string(),
            max_tokens: 1000,
            image_size: "512x512".to_string(),
            request_timeout_ms: 1_000,
        },
        store: StoreConfig {
            kind: "memory".to_string(),
            sqlite_path: None,
            seed: StoreSeed {
                shared_credential: Some("sk-shared".to_string()),
                help_text: Some("Send .gt <prompt> or .gi <prompt>".to_string()),
                privileged_users: vec![],
            },
        },
        queue: Default::default(),
        limits: Default::default(),
        commands: Default::default(),
        messages: Default::default(),
        owners: Default::default(),
        audit: Default::default(),
        logging: Default::default(),
    }
}

/// Forwards every sent message to a channel so tests can await dispatch.
struct ChannelPlatform {
    sent: mpsc::UnboundedSender<OutgoingMessage>,
}

#[async_trait]
impl PlatformClient for ChannelPlatform {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), UpstreamError> {
        let _ = self.sent.send(message.clone());
        Ok(())
    }

    async fn conversation_members(
        &self,
        _peer_id: i64,
    ) -> Result<Vec<ConversationMember>, UpstreamError> {
        Ok(Vec::new())
    }

    async fn photo_upload_server(&self, _peer_id: i64) -> Result<String, UpstreamError> {
        Err(UpstreamError::Missing("upload_url"))
    }

    async fn upload_photo(
        &self,
        _upload_url: &str,
        _image: Vec<u8>,
    ) -> Result<UploadedPhoto, UpstreamError> {
        Err(UpstreamError::Missing("photo"))
    }

    async fn save_photo(&self, _photo: &UploadedPhoto) -> Result<SavedPhoto, UpstreamError> {
        Err(UpstreamError::Missing("response"))
    }
}

struct EchoGeneration;

#[async_trait]
impl GenerationClient for EchoGeneration {
    async fn complete(
        &self,
        _credential: &str,
        prompt: &str,
        _max_tokens: u32,
        _model: &str,
    ) -> Result<String, UpstreamError> {
        Ok(format!("echo: {prompt}"))
    }

    async fn generate_image(&self, _credential: &str, _prompt: &str) -> Result<String, UpstreamError> {
        Err(UpstreamError::Missing("data[0].url"))
    }

    async fn fetch_asset(&self, _url: &str) -> Result<Vec<u8>, UpstreamError> {
        Err(UpstreamError::Missing("asset"))
    }
}

async fn channel_app(cfg: Config) -> (Router, mpsc::UnboundedReceiver<OutgoingMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let store = Store::memory();
    store.seed(&cfg.store.seed).await.unwrap();
    let app = build_app_with(
        cfg,
        Arc::new(ChannelPlatform { sent: tx }),
        Arc::new(EchoGeneration),
        Arc::new(store),
    )
    .await
    .unwrap();
    (app, rx)
}

fn message_new(peer_id: i64, from_id: i64, text: &str) -> Value {
    json!({
        "type": "message_new",
        "group_id": 218000000,
        "secret": "callback-secret",
        "event_id": "3f2b8c1e",
        "object": {
            "message": {
                "peer_id": peer_id,
                "from_id": from_id,
                "conversation_message_id": 41,
                "text": text
            }
        }
    })
}

fn post_callback(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/callback")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn healthz_ok() {
    let app = build_app(test_config()).await.unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn confirmation_event_returns_configured_string() {
    let app = build_app(test_config()).await.unwrap();
    let body = json!({
        "type": "confirmation",
        "group_id": 218000000,
        "secret": "callback-secret"
    });
    let response = app.oneshot(post_callback(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "a1b2c3d4");
}

#[tokio::test]
async fn wrong_secret_or_group_is_forbidden() {
    let (app, mut rx) = channel_app(test_config()).await;

    let mut body = message_new(15, 15, ".help");
    body["secret"] = json!("guessed");
    let response = app.clone().oneshot(post_callback(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let mut body = message_new(15, 15, ".help");
    body["group_id"] = json!(1);
    let response = app.oneshot(post_callback(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn retried_delivery_is_acknowledged_without_dispatch() {
    let (app, mut rx) = channel_app(test_config()).await;
    let mut request = post_callback(&message_new(15, 15, ".help"));
    request
        .headers_mut()
        .insert("X-Retry-Counter", "1".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn help_command_is_answered_in_the_background() {
    let (app, mut rx) = channel_app(test_config()).await;
    let response = app
        .oneshot(post_callback(&message_new(15, 15, ".help")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");

    let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.peer_id, 15);
    assert_eq!(reply.text.as_deref(), Some("Send .gt <prompt> or .gi <prompt>"));
    assert_eq!(reply.forward.unwrap().conversation_message_ids, vec![41]);
}

#[tokio::test]
async fn queued_generation_reports_position_then_result() {
    let mut cfg = test_config();
    cfg.queue.period_ms = 10;
    let (app, mut rx) = channel_app(cfg).await;
    app.oneshot(post_callback(&message_new(15, 15, ".gt tell a joke")))
        .await
        .unwrap();

    let mut texts = Vec::new();
    for _ in 0..2 {
        let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        texts.push(reply.text.unwrap_or_default());
    }
    assert_eq!(texts, vec!["Queued! Position: 1", "echo: tell a joke"]);
}

#[tokio::test]
async fn audit_journal_is_written_and_verifiable() {
    let mut cfg = test_config();
    cfg.queue.period_ms = 10;
    cfg.limits.max_prompt_length = 8;
    let path = std::env::temp_dir()
        .join(format!("warden-api-audit-{}.jsonl", uuid::Uuid::new_v4().as_simple()))
        .to_string_lossy()
        .to_string();
    cfg.audit.jsonl_path = Some(path.clone());
    let (app, mut rx) = channel_app(cfg).await;

    app.oneshot(post_callback(&message_new(15, 15, ".gt a long prompt")))
        .await
        .unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.text.as_deref(), Some("Request is too long."));

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"outcome\":\"prompt_too_long\""));
    assert_eq!(warden_server::verify_audit_chain(&path).unwrap(), 1);
}

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, info, warn};
use warden_config::Config;
use warden_contracts::{EventEnvelope, EVENT_CONFIRMATION};

pub mod audit;
pub mod chain;
pub mod commands;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod generate;
pub mod generation;
pub mod guard;
pub mod platform;
pub mod queue;
pub mod router;
pub mod store;

#[cfg(test)]
mod test_support;

pub use audit::{verify_audit_chain, AuditJournal};
pub use dispatcher::Dispatcher;
pub use generation::{GenerationClient, OpenAiClient};
pub use platform::{PlatformClient, VkClient};
pub use store::{PermissionStore, Store};

/// Retried deliveries carry this header. The first delivery was already
/// dispatched, so retries are acknowledged and dropped.
const RETRY_HEADER: &str = "x-retry-counter";

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, "listening for callback events");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

/// Wires the real platform and generation clients and the configured store.
pub async fn build_app(cfg: Config) -> Result<Router, String> {
    let platform = VkClient::new(&cfg.platform).map_err(|e| e.to_string())?;
    let generation = OpenAiClient::new(&cfg.generation).map_err(|e| e.to_string())?;
    let store = Store::open(&cfg.store).map_err(|e| e.to_string())?;
    store
        .seed(&cfg.store.seed)
        .await
        .map_err(|e| format!("store seed failed: {e}"))?;
    build_app_with(cfg, Arc::new(platform), Arc::new(generation), Arc::new(store)).await
}

pub async fn build_app_with(
    cfg: Config,
    platform: Arc<dyn PlatformClient>,
    generation: Arc<dyn GenerationClient>,
    store: Arc<dyn PermissionStore>,
) -> Result<Router, String> {
    let audit = match cfg.audit.jsonl_path.as_deref() {
        Some(path) => Some(Arc::new(AuditJournal::open(path).await?)),
        None => None,
    };
    let dispatcher = Dispatcher::new(&cfg, platform, generation, store, audit);
    let state = AppState {
        platform: Arc::new(cfg.platform),
        dispatcher: Arc::new(dispatcher),
    };
    Ok(Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/callback", post(callback))
        .with_state(state))
}

#[derive(Clone)]
struct AppState {
    platform: Arc<warden_config::Platform>,
    dispatcher: Arc<Dispatcher>,
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(envelope): Json<EventEnvelope>,
) -> Response {
    if envelope.secret != state.platform.secret {
        warn!(group_id = envelope.group_id, "callback secret mismatch");
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    if envelope.group_id != state.platform.group_id {
        warn!(group_id = envelope.group_id, "callback for unexpected group");
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    if envelope.kind == EVENT_CONFIRMATION {
        return (StatusCode::OK, state.platform.confirmation.clone()).into_response();
    }
    if headers.contains_key(RETRY_HEADER) {
        debug!(event_id = ?envelope.event_id, "acknowledging retried delivery");
        return (StatusCode::OK, "ok").into_response();
    }

    // The platform expects a fast acknowledgement; generation may take minutes.
    let dispatcher = Arc::clone(&state.dispatcher);
    tokio::spawn(async move {
        dispatcher.dispatch(&envelope).await;
    });
    (StatusCode::OK, "ok").into_response()
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

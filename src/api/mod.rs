use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;

use crate::AppState;

pub mod auth;
pub mod handlers;
pub mod webhooks;

/// Full HTTP surface: probes, metrics, public webhooks and the tenant API.
/// Transport layers (tracing, CORS) are added by the binary.
pub fn app_router(state: Arc<AppState>) -> Router {
    let tenant_api = api_router().layer(middleware::from_fn_with_state(
        state.clone(),
        auth::tenant_auth,
    ));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/webhooks/slack/:chatbot_id", post(webhooks::slack_events))
        .nest("/api/v1", tenant_api)
        .fallback(fallback_404)
        .with_state(state)
}

/// Build the tenant API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/integrations", get(handlers::list_integrations))
        .route(
            "/credentials",
            get(handlers::list_credentials).post(handlers::create_credential),
        )
        .route(
            "/credentials/:id",
            get(handlers::get_credential).delete(handlers::delete_credential),
        )
        .route("/credentials/:id/test", post(handlers::test_credential))
        .route(
            "/connectors",
            get(handlers::list_connectors).post(handlers::create_connector),
        )
        .route(
            "/connectors/:id",
            get(handlers::get_connector)
                .patch(handlers::update_connector)
                .delete(handlers::delete_connector),
        )
        .route("/chatbots", post(handlers::create_chatbot))
        .route("/chatbots/:id/connectors", post(handlers::link_connector))
        .route("/chats", get(handlers::list_chats).post(handlers::create_chat))
        .route("/chats/:id", get(handlers::get_chat))
        .route("/chats/:id/messages", post(handlers::append_message))
        .route("/chats/:id/replies", post(handlers::record_reply))
        .route("/chats/:id/feedback", put(handlers::set_feedback))
        .route("/chats/:id/status", put(handlers::set_status))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Err(e) => {
            tracing::error!("readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable"})),
            )
        }
    }
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

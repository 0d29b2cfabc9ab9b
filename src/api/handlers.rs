use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::auth::Tenant;
use crate::errors::AppError;
use crate::integrations::{CredentialField, ServiceType, TestConnectionResult};
use crate::models::chat::{ChatSession, ChatStatus};
use crate::models::connector::{Chatbot, Connector, ConnectorPatch};
use crate::models::credential::CredentialDescriptor;
use crate::services::chat::CreateSession;
use crate::services::connectors::CreateConnector;
use crate::services::credentials::CreateCredential;
use crate::services::dispatch::ReplyOutcome;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct ServiceTypeFilter {
    pub service_type: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatListParams {
    pub chatbot_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct IntegrationInfo {
    pub service_type: ServiceType,
    pub supports_connection_test: bool,
    pub credential_schema: Vec<CredentialField>,
}

#[derive(Deserialize)]
pub struct CreateChatbotRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct LinkConnectorRequest {
    pub connector_id: Uuid,
}

#[derive(Deserialize)]
pub struct AppendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
pub struct ReplyRequest {
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default = "default_true")]
    pub send_to_interface: bool,
}

#[derive(Deserialize)]
pub struct FeedbackRequest {
    pub feedback: i64,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: ChatStatus,
}

fn default_true() -> bool {
    true
}

// ── Integrations ─────────────────────────────────────────────

/// GET /api/v1/integrations: supported service types and their credential shapes
pub async fn list_integrations(State(state): State<Arc<AppState>>) -> Json<Vec<IntegrationInfo>> {
    let infos = state
        .registry
        .service_types()
        .into_iter()
        .filter_map(|st| state.registry.get_type(st).ok())
        .map(|integration| IntegrationInfo {
            service_type: integration.service_type(),
            supports_connection_test: integration.supports_connection_test(),
            credential_schema: integration.credential_schema(),
        })
        .collect();
    Json(infos)
}

// ── Credentials ──────────────────────────────────────────────

/// POST /api/v1/credentials: test, seal and store a credential
pub async fn create_credential(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Json(payload): Json<CreateCredential>,
) -> Result<(StatusCode, Json<CredentialDescriptor>), AppError> {
    let descriptor = state
        .credentials
        .create(org_id, payload, state.config.outbound_timeout)
        .await?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}

/// GET /api/v1/credentials
pub async fn list_credentials(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Query(filter): Query<ServiceTypeFilter>,
) -> Result<Json<Vec<CredentialDescriptor>>, AppError> {
    let rows = state
        .credentials
        .list(org_id, filter.service_type.as_deref())
        .await?;
    Ok(Json(rows))
}

pub async fn get_credential(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
) -> Result<Json<CredentialDescriptor>, AppError> {
    Ok(Json(state.credentials.get(org_id, id).await?))
}

pub async fn delete_credential(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.credentials.delete(org_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/credentials/:id/test: re-run the connectivity test
pub async fn test_credential(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
) -> Result<Json<TestConnectionResult>, AppError> {
    let result = state
        .credentials
        .test(org_id, id, state.config.outbound_timeout)
        .await?;
    Ok(Json(result))
}

// ── Connectors ───────────────────────────────────────────────

pub async fn create_connector(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Json(payload): Json<CreateConnector>,
) -> Result<(StatusCode, Json<Connector>), AppError> {
    let connector = state.connectors.create(org_id, payload).await?;
    Ok((StatusCode::CREATED, Json(connector)))
}

pub async fn list_connectors(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Query(filter): Query<ServiceTypeFilter>,
) -> Result<Json<Vec<Connector>>, AppError> {
    let rows = state
        .connectors
        .list(org_id, filter.service_type.as_deref())
        .await?;
    Ok(Json(rows))
}

pub async fn get_connector(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
) -> Result<Json<Connector>, AppError> {
    Ok(Json(state.connectors.get(org_id, id).await?))
}

pub async fn update_connector(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ConnectorPatch>,
) -> Result<Json<Connector>, AppError> {
    Ok(Json(state.connectors.update(org_id, id, patch).await?))
}

pub async fn delete_connector(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.connectors.delete(org_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Chatbots ─────────────────────────────────────────────────

pub async fn create_chatbot(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Json(payload): Json<CreateChatbotRequest>,
) -> Result<(StatusCode, Json<Chatbot>), AppError> {
    let chatbot = state.connectors.create_chatbot(org_id, &payload.name).await?;
    Ok((StatusCode::CREATED, Json(chatbot)))
}

/// POST /api/v1/chatbots/:id/connectors: attach a connector to a chatbot
pub async fn link_connector(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Path(chatbot_id): Path<Uuid>,
    Json(payload): Json<LinkConnectorRequest>,
) -> Result<StatusCode, AppError> {
    state
        .connectors
        .link(org_id, chatbot_id, payload.connector_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Chat sessions ────────────────────────────────────────────

pub async fn create_chat(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Json(payload): Json<CreateSession>,
) -> Result<(StatusCode, Json<ChatSession>), AppError> {
    let session = state.chats.create_session(org_id, payload).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Query(params): Query<ChatListParams>,
) -> Result<Json<Vec<ChatSession>>, AppError> {
    let rows = state
        .chats
        .list(org_id, params.chatbot_id, params.limit, params.offset)
        .await?;
    Ok(Json(rows))
}

pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChatSession>, AppError> {
    Ok(Json(state.chats.get(org_id, id).await?))
}

/// POST /api/v1/chats/:id/messages: append a user message
pub async fn append_message(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AppendMessageRequest>,
) -> Result<Json<ChatSession>, AppError> {
    let session = state
        .chats
        .append_user(org_id, id, &payload.content, payload.metadata)
        .await?;
    Ok(Json(session))
}

/// POST /api/v1/chats/:id/replies: append an assistant reply and dispatch it
pub async fn record_reply(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReplyRequest>,
) -> Result<Json<ReplyOutcome>, AppError> {
    let outcome = state
        .dispatcher
        .record_reply(
            org_id,
            id,
            &payload.content,
            payload.metadata,
            payload.send_to_interface,
            state.config.outbound_timeout,
        )
        .await?;
    Ok(Json(outcome))
}

pub async fn set_feedback(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<Json<ChatSession>, AppError> {
    Ok(Json(state.chats.set_feedback(org_id, id, payload.feedback).await?))
}

pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Extension(Tenant(org_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusRequest>,
) -> Result<Json<ChatSession>, AppError> {
    Ok(Json(state.chats.set_status(org_id, id, payload.status).await?))
}

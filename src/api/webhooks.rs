//! Public inbound webhooks. Tenant is resolved from the chatbot in the path,
//! authenticity from the platform's request signature.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Map, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::AppError;
use crate::integrations::ServiceType;
use crate::models::chat::{ChatSession, ChatStatus, Message, Role};
use crate::models::slack_events::{SlackEnvelope, SlackEvent};
use crate::services::chat::derive_session_key;
use crate::AppState;

/// Maximum clock skew accepted on `X-Slack-Request-Timestamp`.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature headers")]
    Missing,
    #[error("malformed request timestamp")]
    MalformedTimestamp,
    #[error("request timestamp outside the accepted window")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

/// `v0=` + hex HMAC-SHA256 over `v0:{timestamp}:{body}`.
pub fn slack_signature(signing_secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_slack_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::MalformedTimestamp)?;
    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Stale);
    }
    let expected = slack_signature(signing_secret, timestamp.trim(), body);
    if bool::from(expected.as_bytes().ct_eq(signature.trim().as_bytes())) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /webhooks/slack/:chatbot_id: Slack Events API receiver
pub async fn slack_events(
    State(state): State<Arc<AppState>>,
    Path(chatbot_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let org_id = state
        .store
        .chatbot_organization(chatbot_id)
        .await?
        .ok_or_else(|| AppError::NotFound("chatbot".into()))?;

    let connector = state
        .store
        .find_linked_connector(org_id, chatbot_id, ServiceType::Slack)
        .await?;

    if let Some(connector) = &connector {
        let (_, secrets) = state
            .credentials
            .decrypt_for_use(org_id, connector.credential_id)
            .await?;
        match secrets.non_empty("signing_secret") {
            Some(signing_secret) => {
                let (Some(ts), Some(sig)) = (
                    header_str(&headers, "x-slack-request-timestamp"),
                    header_str(&headers, "x-slack-signature"),
                ) else {
                    tracing::warn!(chatbot_id = %chatbot_id, "slack webhook without signature headers");
                    return Err(AppError::Unauthorized(SignatureError::Missing.to_string()));
                };
                let now = chrono::Utc::now().timestamp();
                verify_slack_signature(signing_secret, ts, &body, sig, now).map_err(|e| {
                    tracing::warn!(chatbot_id = %chatbot_id, error = %e, "slack signature rejected");
                    AppError::Unauthorized(e.to_string())
                })?;
            }
            None => {
                tracing::warn!(
                    chatbot_id = %chatbot_id,
                    connector_id = %connector.id,
                    "slack credential has no signing_secret; accepting unverified webhook"
                );
            }
        }
    }

    let envelope: SlackEnvelope = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("invalid slack payload: {}", e)))?;

    match envelope {
        SlackEnvelope::UrlVerification { challenge } => {
            state.metrics.webhook_event("SLACK", "url_verification");
            Ok(([(header::CONTENT_TYPE, "text/plain")], challenge).into_response())
        }
        SlackEnvelope::Unsupported => {
            state.metrics.webhook_event("SLACK", "unsupported");
            Ok(Json(json!({"status": "event type ignored"})).into_response())
        }
        SlackEnvelope::EventCallback { team_id, event_id, event } => {
            if !event.is_conversational() {
                state.metrics.webhook_event("SLACK", "ignored");
                return Ok(Json(json!({"status": "event type ignored"})).into_response());
            }
            if event.is_bot_or_subtype() {
                state.metrics.webhook_event("SLACK", "ignored");
                return Ok(Json(json!({"status": "event ignored"})).into_response());
            }
            state.metrics.webhook_event("SLACK", "event_callback");

            let Some(session) = ingest_event(
                &state,
                org_id,
                chatbot_id,
                connector.map(|c| c.id),
                team_id,
                event_id,
                &event,
            )
            .await?
            else {
                state.metrics.webhook_event("SLACK", "duplicate");
                return Ok(Json(json!({"status": "event ignored"})).into_response());
            };

            let text = event.text.clone().unwrap_or_default();
            let task_state = state.clone();
            tokio::spawn(async move {
                respond(task_state, org_id, session, text).await;
            });

            Ok(Json(json!({"status": "event processed"})).into_response())
        }
    }
}

/// Appends the event to its session. Returns `None` when a message with the
/// same Slack `ts` is already logged: a mention arrives both as `message` and
/// as `app_mention`, and Slack redelivers unacknowledged events.
async fn ingest_event(
    state: &AppState,
    org_id: Uuid,
    chatbot_id: Uuid,
    connector_id: Option<Uuid>,
    team_id: Option<String>,
    event_id: Option<String>,
    event: &SlackEvent,
) -> Result<Option<ChatSession>, AppError> {
    let team = team_id
        .as_deref()
        .or(event.team.as_deref())
        .ok_or_else(|| AppError::Validation("missing team_id".into()))?;
    let channel = event
        .channel
        .as_deref()
        .ok_or_else(|| AppError::Validation("missing channel".into()))?;
    let user = event
        .user
        .as_deref()
        .ok_or_else(|| AppError::Validation("missing user".into()))?;
    let key = derive_session_key(team, channel, user)?;

    if let Some(ts) = event.ts.as_deref() {
        let existing = state.store.find_chat_by_key(org_id, connector_id, &key).await?;
        if existing.is_some_and(|s| s.chatbot_id == chatbot_id && has_slack_ts(&s, ts)) {
            tracing::debug!(chatbot_id = %chatbot_id, kind = %event.kind, ts, "slack message already ingested");
            return Ok(None);
        }
    }

    let mut metadata = Map::new();
    if let Some(ts) = &event.ts {
        metadata.insert("slack_ts".into(), Value::String(ts.clone()));
    }
    if let Some(id) = event_id {
        metadata.insert("event_id".into(), Value::String(id));
    }
    let inbound = Message::new(Role::User, event.text.clone().unwrap_or_default())
        .with_metadata((!metadata.is_empty()).then_some(Value::Object(metadata)));

    let configuration = event
        .thread_hint()
        .map(|ts| json!({ "thread_ts": ts }));

    let resolved = state
        .chats
        .find_or_create(org_id, chatbot_id, connector_id, &key, inbound, configuration)
        .await?;
    tracing::info!(
        chat_id = %resolved.session.id,
        created = resolved.created,
        kind = %event.kind,
        "slack event ingested"
    );
    Ok(Some(resolved.session))
}

fn has_slack_ts(session: &ChatSession, ts: &str) -> bool {
    session.messages.iter().any(|m| {
        m.metadata
            .as_ref()
            .and_then(|meta| meta.get("slack_ts"))
            .and_then(Value::as_str)
            == Some(ts)
    })
}

/// Generates and delivers the reply outside the request that carried the event.
async fn respond(state: Arc<AppState>, org_id: Uuid, session: ChatSession, inbound: String) {
    let reply = match state.replies.generate(&session, &inbound).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(chat_id = %session.id, error = %e, "reply generation failed");
            if let Err(e) = state.chats.set_status(org_id, session.id, ChatStatus::Error).await {
                tracing::error!(chat_id = %session.id, error = %e, "could not mark session as errored");
            }
            return;
        }
    };

    match state
        .dispatcher
        .record_reply(org_id, session.id, &reply, None, true, state.config.outbound_timeout)
        .await
    {
        Ok(outcome) => {
            tracing::debug!(chat_id = %session.id, dispatch = ?outcome.dispatch, "reply recorded")
        }
        Err(e) => tracing::warn!(chat_id = %session.id, error = %e, "reply could not be recorded"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";

    fn session_with(messages: Vec<Message>) -> ChatSession {
        let now = chrono::Utc::now();
        ChatSession {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            chatbot_id: Uuid::new_v4(),
            connector_id: None,
            external_session_key: Some("T1_C1_U1".into()),
            messages,
            status: ChatStatus::Processing,
            feedback: None,
            configuration: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_slack_ts_lookup() {
        let session = session_with(vec![
            Message::system_intro(),
            Message::new(Role::User, "hi").with_metadata(Some(json!({"slack_ts": "1700.0001"}))),
        ]);
        assert!(has_slack_ts(&session, "1700.0001"));
        assert!(!has_slack_ts(&session, "1700.0002"));
        assert!(!has_slack_ts(&session_with(vec![Message::new(Role::User, "hi")]), "1700.0001"));
    }

    #[test]
    fn test_signature_roundtrip() {
        let body = br#"{"type":"event_callback"}"#;
        let sig = slack_signature(SECRET, "1700000000", body);
        assert!(sig.starts_with("v0="));
        assert_eq!(verify_slack_signature(SECRET, "1700000000", body, &sig, 1_700_000_100), Ok(()));
    }

    #[test]
    fn test_signature_mismatch() {
        let body = b"payload";
        let sig = slack_signature("other-secret", "1700000000", body);
        assert_eq!(
            verify_slack_signature(SECRET, "1700000000", body, &sig, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
        let sig = slack_signature(SECRET, "1700000000", body);
        assert_eq!(
            verify_slack_signature(SECRET, "1700000000", b"payloaD", &sig, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_and_malformed_timestamps() {
        let sig = slack_signature(SECRET, "1700000000", b"x");
        assert_eq!(
            verify_slack_signature(SECRET, "1700000000", b"x", &sig, 1_700_000_000 + SIGNATURE_TOLERANCE_SECS + 1),
            Err(SignatureError::Stale)
        );
        assert_eq!(
            verify_slack_signature(SECRET, "yesterday", b"x", &sig, 1_700_000_000),
            Err(SignatureError::MalformedTimestamp)
        );
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{MessageSender, TransportError};
use crate::integrations::ServiceType;
use crate::models::chat::ChatSession;
use crate::vault::SecretMap;

/// Posts replies through `chat.postMessage`.
#[derive(Clone)]
pub struct SlackSender {
    client: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Serialize)]
pub struct SlackMessage<'a> {
    pub channel: &'a str,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackSender {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn post_message(&self, token: &str, message: &SlackMessage<'_>) -> Result<(), TransportError> {
        let resp = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(token)
            .json(message)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Rejected(format!("status={}, body={}", status, body)));
        }

        let body: PostMessageResponse = resp.json().await?;
        if !body.ok {
            return Err(TransportError::Rejected(
                body.error.unwrap_or_else(|| "unknown_error".into()),
            ));
        }

        tracing::info!(channel = %message.channel, threaded = message.thread_ts.is_some(), "sent slack message");
        Ok(())
    }
}

/// Channel id embedded in a `{team}_{channel}_{user}` session key.
pub fn channel_from_session_key(key: &str) -> Option<&str> {
    let mut parts = key.split('_');
    let _team = parts.next()?;
    let channel = parts.next()?;
    parts.next()?;
    (!channel.is_empty()).then_some(channel)
}

#[async_trait]
impl MessageSender for SlackSender {
    fn service_type(&self) -> ServiceType {
        ServiceType::Slack
    }

    async fn send(
        &self,
        secrets: &SecretMap,
        session: &ChatSession,
        text: &str,
    ) -> Result<(), TransportError> {
        let token = secrets
            .non_empty("bot_token")
            .ok_or(TransportError::MissingSecret("bot_token"))?;

        let key = session
            .external_session_key
            .as_deref()
            .ok_or_else(|| TransportError::Addressing("session has no external key".into()))?;
        let channel = channel_from_session_key(key).ok_or_else(|| {
            TransportError::Addressing(format!("no channel in session key '{}'", key))
        })?;
        let thread_ts = session.configuration.get("thread_ts").and_then(|v| v.as_str());

        self.post_message(token, &SlackMessage { channel, text, thread_ts }).await
    }
}

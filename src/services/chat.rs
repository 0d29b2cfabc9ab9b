use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::chat::{ChatSession, ChatStatus, Message, MessageAppend, NewChatSession, Role};
use crate::store::{Store, StoreError};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Creation races are resolved by re-reading the winner; a handful of
/// rounds covers a concurrent delete in between.
const FIND_OR_CREATE_ATTEMPTS: usize = 3;

const KEY_SEPARATOR: char = '_';

/// Joins the platform's conversation-addressing fields into a session key.
pub fn derive_session_key(workspace_id: &str, channel_id: &str, user_id: &str) -> Result<String, AppError> {
    let parts = [
        ("workspace id", workspace_id),
        ("channel id", channel_id),
        ("user id", user_id),
    ];
    for (what, value) in parts {
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!("{} is required", what)));
        }
    }
    Ok(format!("{workspace_id}{KEY_SEPARATOR}{channel_id}{KEY_SEPARATOR}{user_id}"))
}

#[derive(Debug, Deserialize)]
pub struct CreateSession {
    pub chatbot_id: Uuid,
    #[serde(default)]
    pub connector_id: Option<Uuid>,
    #[serde(default)]
    pub external_session_key: Option<String>,
    #[serde(default)]
    pub initial_message: Option<String>,
    #[serde(default)]
    pub configuration: Option<Value>,
}

#[derive(Debug)]
pub struct Resolved {
    pub session: ChatSession,
    pub created: bool,
}

/// Session lookup, creation and the append-driven status machine.
pub struct ChatService {
    store: Arc<dyn Store>,
}

impl ChatService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create_session(&self, org_id: Uuid, req: CreateSession) -> Result<ChatSession, AppError> {
        self.ensure_chatbot(org_id, req.chatbot_id).await?;

        if matches!(&req.configuration, Some(c) if !c.is_object() && !c.is_null()) {
            return Err(AppError::Validation("configuration must be a JSON object".into()));
        }

        if let Some(connector_id) = req.connector_id {
            if self.store.get_connector(org_id, connector_id).await?.is_none() {
                return Err(AppError::NotFound("connector".into()));
            }
            if !self
                .store
                .is_connector_linked(org_id, req.chatbot_id, connector_id)
                .await?
            {
                return Err(AppError::Validation(format!(
                    "connector {} is not linked to chatbot {}",
                    connector_id, req.chatbot_id
                )));
            }
        }

        let mut messages = vec![Message::system_intro()];
        let mut status = ChatStatus::Active;
        if let Some(text) = req.initial_message.filter(|t| !t.trim().is_empty()) {
            messages.push(Message::new(Role::User, text));
            status = ChatStatus::Processing;
        }

        let external_session_key = req
            .external_session_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let session = self
            .store
            .insert_chat(NewChatSession {
                organization_id: org_id,
                chatbot_id: req.chatbot_id,
                connector_id: req.connector_id,
                external_session_key,
                messages,
                status,
                configuration: object_or_empty(req.configuration),
            })
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => {
                    AppError::Conflict("a session already exists for this external key".into())
                }
                other => other.into(),
            })?;

        tracing::info!(chat_id = %session.id, chatbot_id = %session.chatbot_id, "created chat session");
        Ok(session)
    }

    /// Appends `inbound` to the session for `external_session_key`, creating
    /// the session if this is the first event of the conversation.
    ///
    /// Safe under concurrent and redelivered events: the store's uniqueness
    /// constraint picks one creator and the losers append to its session.
    pub async fn find_or_create(
        &self,
        org_id: Uuid,
        chatbot_id: Uuid,
        connector_id: Option<Uuid>,
        external_session_key: &str,
        inbound: Message,
        configuration: Option<Value>,
    ) -> Result<Resolved, AppError> {
        self.ensure_chatbot(org_id, chatbot_id).await?;

        for attempt in 1..=FIND_OR_CREATE_ATTEMPTS {
            if let Some(existing) = self
                .store
                .find_chat_by_key(org_id, connector_id, external_session_key)
                .await?
            {
                if existing.chatbot_id != chatbot_id {
                    tracing::warn!(
                        chat_id = %existing.id,
                        owner = %existing.chatbot_id,
                        chatbot_id = %chatbot_id,
                        "external session key already belongs to another chatbot"
                    );
                    return Err(AppError::Conflict(format!(
                        "session key '{}' is already bound to another chatbot",
                        external_session_key
                    )));
                }
                let appended = self
                    .store
                    .append_messages(
                        org_id,
                        existing.id,
                        MessageAppend {
                            messages: vec![inbound.clone()],
                            transition: Some(ChatStatus::Processing),
                            configuration: configuration.clone(),
                        },
                    )
                    .await?;
                match appended {
                    Some(session) => {
                        tracing::debug!(chat_id = %session.id, "appended inbound message to existing session");
                        return Ok(Resolved { session, created: false });
                    }
                    // Deleted between read and append; try again.
                    None => continue,
                }
            }

            let new = NewChatSession {
                organization_id: org_id,
                chatbot_id,
                connector_id,
                external_session_key: Some(external_session_key.to_string()),
                messages: vec![Message::system_intro(), inbound.clone()],
                status: ChatStatus::Processing,
                configuration: object_or_empty(configuration.clone()),
            };
            match self.store.insert_chat(new).await {
                Ok(session) => {
                    tracing::info!(chat_id = %session.id, chatbot_id = %chatbot_id, "created chat session from inbound event");
                    return Ok(Resolved { session, created: true });
                }
                Err(StoreError::UniqueViolation(_)) => {
                    tracing::debug!(attempt, "lost session creation race, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Conflict(format!(
            "could not resolve session for key '{}' after {} attempts",
            external_session_key, FIND_OR_CREATE_ATTEMPTS
        )))
    }

    pub async fn get(&self, org_id: Uuid, id: Uuid) -> Result<ChatSession, AppError> {
        self.store
            .get_chat(org_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound("chat session".into()))
    }

    pub async fn list(
        &self,
        org_id: Uuid,
        chatbot_id: Option<Uuid>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<ChatSession>, AppError> {
        let (limit, offset) = page_bounds(limit, offset);
        Ok(self.store.list_chats(org_id, chatbot_id, limit, offset).await?)
    }

    pub async fn append_user(
        &self,
        org_id: Uuid,
        id: Uuid,
        content: &str,
        metadata: Option<Value>,
    ) -> Result<ChatSession, AppError> {
        self.append(org_id, id, Role::User, content, metadata, ChatStatus::Processing)
            .await
    }

    pub async fn append_assistant(
        &self,
        org_id: Uuid,
        id: Uuid,
        content: &str,
        metadata: Option<Value>,
    ) -> Result<ChatSession, AppError> {
        self.append(org_id, id, Role::Assistant, content, metadata, ChatStatus::Active)
            .await
    }

    pub async fn set_feedback(&self, org_id: Uuid, id: Uuid, feedback: i64) -> Result<ChatSession, AppError> {
        if !(-1..=1).contains(&feedback) {
            return Err(AppError::Validation("feedback must be -1, 0 or 1".into()));
        }
        self.store
            .set_chat_feedback(org_id, id, feedback as i16)
            .await?
            .ok_or_else(|| AppError::NotFound("chat session".into()))
    }

    /// External status change. PROCESSING is owned by message appends.
    pub async fn set_status(&self, org_id: Uuid, id: Uuid, status: ChatStatus) -> Result<ChatSession, AppError> {
        if status == ChatStatus::Processing {
            return Err(AppError::Validation(
                "PROCESSING is entered by appending a user message".into(),
            ));
        }
        if let Some(session) = self.store.set_chat_status(org_id, id, status).await? {
            tracing::info!(chat_id = %id, status = %status, "chat status changed");
            return Ok(session);
        }
        match self.store.get_chat(org_id, id).await? {
            Some(s) if s.status.is_terminal() => {
                Err(AppError::Conflict("chat session is completed".into()))
            }
            _ => Err(AppError::NotFound("chat session".into())),
        }
    }

    async fn append(
        &self,
        org_id: Uuid,
        id: Uuid,
        role: Role,
        content: &str,
        metadata: Option<Value>,
        transition: ChatStatus,
    ) -> Result<ChatSession, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::Validation("message content must not be empty".into()));
        }
        self.store
            .append_messages(
                org_id,
                id,
                MessageAppend {
                    messages: vec![Message::new(role, content).with_metadata(metadata)],
                    transition: Some(transition),
                    configuration: None,
                },
            )
            .await?
            .ok_or_else(|| AppError::NotFound("chat session".into()))
    }

    async fn ensure_chatbot(&self, org_id: Uuid, chatbot_id: Uuid) -> Result<(), AppError> {
        match self.store.get_chatbot(org_id, chatbot_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound("chatbot".into())),
        }
    }
}

fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

fn object_or_empty(configuration: Option<Value>) -> Value {
    match configuration {
        Some(v @ Value::Object(_)) => v,
        _ => Value::Object(Default::default()),
    }
}

//! In-process [`Store`] with the same constraints as the Postgres schema.
//! Backs the test suite and `chathub serve --in-memory`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::integrations::ServiceType;
use crate::models::chat::{merge_configuration, ChatSession, ChatStatus, MessageAppend, NewChatSession};
use crate::models::connector::{Chatbot, Connector, ConnectorPatch, NewConnector};
use crate::models::credential::{Credential, CredentialStatus, NewCredential};

#[derive(Default)]
struct Tables {
    credentials: HashMap<Uuid, Credential>,
    connectors: HashMap<Uuid, Connector>,
    chatbots: HashMap<Uuid, Chatbot>,
    links: HashSet<(Uuid, Uuid)>,
    chats: HashMap<Uuid, ChatSession>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn owned<T>(row: Option<&T>, org_id: Uuid, org_of: impl Fn(&T) -> Uuid) -> Option<&T> {
    row.filter(|r| org_of(r) == org_id)
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_credential(&self, new: NewCredential) -> Result<Credential, StoreError> {
        let now = Utc::now();
        let credential = Credential {
            id: Uuid::new_v4(),
            organization_id: new.organization_id,
            service_type: new.service_type,
            label: new.label,
            encrypted_blob: new.encrypted_blob,
            status: CredentialStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let mut t = self.tables.write().await;
        t.credentials.insert(credential.id, credential.clone());
        Ok(credential)
    }

    async fn get_credential(&self, org_id: Uuid, id: Uuid) -> Result<Option<Credential>, StoreError> {
        let t = self.tables.read().await;
        Ok(owned(t.credentials.get(&id), org_id, |c| c.organization_id).cloned())
    }

    async fn list_credentials(
        &self,
        org_id: Uuid,
        service_type: Option<ServiceType>,
    ) -> Result<Vec<Credential>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<Credential> = t
            .credentials
            .values()
            .filter(|c| c.organization_id == org_id)
            .filter(|c| service_type.map_or(true, |st| c.service_type == st))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn set_credential_status(
        &self,
        org_id: Uuid,
        id: Uuid,
        status: CredentialStatus,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        match t.credentials.get_mut(&id).filter(|c| c.organization_id == org_id) {
            Some(c) => {
                c.status = status;
                c.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_credential(&self, org_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        if owned(t.credentials.get(&id), org_id, |c| c.organization_id).is_none() {
            return Ok(false);
        }
        if t.connectors.values().any(|c| c.credential_id == id) {
            return Err(StoreError::InUse("connectors_credential_id_fkey".into()));
        }
        t.credentials.remove(&id);
        Ok(true)
    }

    async fn insert_connector(&self, new: NewConnector) -> Result<Connector, StoreError> {
        let mut t = self.tables.write().await;
        if !t.credentials.contains_key(&new.credential_id) {
            return Err(StoreError::InUse("connectors_credential_id_fkey".into()));
        }
        let now = Utc::now();
        let connector = Connector {
            id: Uuid::new_v4(),
            organization_id: new.organization_id,
            name: new.name,
            service_type: new.service_type,
            credential_id: new.credential_id,
            configuration: new.configuration,
            is_active: new.is_active,
            created_at: now,
            updated_at: now,
        };
        t.connectors.insert(connector.id, connector.clone());
        Ok(connector)
    }

    async fn get_connector(&self, org_id: Uuid, id: Uuid) -> Result<Option<Connector>, StoreError> {
        let t = self.tables.read().await;
        Ok(owned(t.connectors.get(&id), org_id, |c| c.organization_id).cloned())
    }

    async fn list_connectors(
        &self,
        org_id: Uuid,
        service_type: Option<ServiceType>,
    ) -> Result<Vec<Connector>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<Connector> = t
            .connectors
            .values()
            .filter(|c| c.organization_id == org_id)
            .filter(|c| service_type.map_or(true, |st| c.service_type == st))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn update_connector(
        &self,
        org_id: Uuid,
        id: Uuid,
        patch: ConnectorPatch,
    ) -> Result<Option<Connector>, StoreError> {
        let mut t = self.tables.write().await;
        let Some(c) = t.connectors.get_mut(&id).filter(|c| c.organization_id == org_id) else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            c.name = name;
        }
        if let Some(configuration) = patch.configuration {
            c.configuration = configuration;
        }
        if let Some(is_active) = patch.is_active {
            c.is_active = is_active;
        }
        c.updated_at = Utc::now();
        Ok(Some(c.clone()))
    }

    async fn delete_connector(&self, org_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        if owned(t.connectors.get(&id), org_id, |c| c.organization_id).is_none() {
            return Ok(false);
        }
        if t.chats.values().any(|s| s.connector_id == Some(id)) {
            return Err(StoreError::InUse("chat_sessions_connector_id_fkey".into()));
        }
        t.connectors.remove(&id);
        t.links.retain(|(_, connector)| *connector != id);
        Ok(true)
    }

    async fn insert_chatbot(&self, org_id: Uuid, name: &str) -> Result<Chatbot, StoreError> {
        let chatbot = Chatbot {
            id: Uuid::new_v4(),
            organization_id: org_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.tables.write().await.chatbots.insert(chatbot.id, chatbot.clone());
        Ok(chatbot)
    }

    async fn get_chatbot(&self, org_id: Uuid, id: Uuid) -> Result<Option<Chatbot>, StoreError> {
        let t = self.tables.read().await;
        Ok(owned(t.chatbots.get(&id), org_id, |b| b.organization_id).cloned())
    }

    async fn chatbot_organization(&self, chatbot_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.chatbots.get(&chatbot_id).map(|b| b.organization_id))
    }

    async fn link_connector(
        &self,
        org_id: Uuid,
        chatbot_id: Uuid,
        connector_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let bot_ok = owned(t.chatbots.get(&chatbot_id), org_id, |b| b.organization_id).is_some();
        let conn_ok = owned(t.connectors.get(&connector_id), org_id, |c| c.organization_id).is_some();
        if !bot_ok || !conn_ok {
            return Err(StoreError::NotFound);
        }
        t.links.insert((chatbot_id, connector_id));
        Ok(())
    }

    async fn is_connector_linked(
        &self,
        org_id: Uuid,
        chatbot_id: Uuid,
        connector_id: Uuid,
    ) -> Result<bool, StoreError> {
        let t = self.tables.read().await;
        let bot_ok = owned(t.chatbots.get(&chatbot_id), org_id, |b| b.organization_id).is_some();
        Ok(bot_ok && t.links.contains(&(chatbot_id, connector_id)))
    }

    async fn find_linked_connector(
        &self,
        org_id: Uuid,
        chatbot_id: Uuid,
        service_type: ServiceType,
    ) -> Result<Option<Connector>, StoreError> {
        let t = self.tables.read().await;
        let mut candidates: Vec<&Connector> = t
            .links
            .iter()
            .filter(|(bot, _)| *bot == chatbot_id)
            .filter_map(|(_, connector)| t.connectors.get(connector))
            .filter(|c| c.organization_id == org_id && c.service_type == service_type)
            .collect();
        candidates.sort_by(|a, b| b.is_active.cmp(&a.is_active).then(a.created_at.cmp(&b.created_at)));
        Ok(candidates.first().map(|c| (*c).clone()))
    }

    async fn insert_chat(&self, new: NewChatSession) -> Result<ChatSession, StoreError> {
        let mut t = self.tables.write().await;
        if !t.chatbots.contains_key(&new.chatbot_id) {
            return Err(StoreError::InUse("chat_sessions_chatbot_id_fkey".into()));
        }
        if let Some(key) = &new.external_session_key {
            let taken = t.chats.values().any(|s| {
                s.organization_id == new.organization_id
                    && s.connector_id == new.connector_id
                    && s.external_session_key.as_deref() == Some(key.as_str())
            });
            if taken {
                return Err(StoreError::UniqueViolation("uq_chat_sessions_external_key".into()));
            }
        }
        let now = Utc::now();
        let session = ChatSession {
            id: Uuid::new_v4(),
            organization_id: new.organization_id,
            chatbot_id: new.chatbot_id,
            connector_id: new.connector_id,
            external_session_key: new.external_session_key,
            messages: new.messages,
            status: new.status,
            feedback: None,
            configuration: new.configuration,
            created_at: now,
            updated_at: now,
        };
        t.chats.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_chat(&self, org_id: Uuid, id: Uuid) -> Result<Option<ChatSession>, StoreError> {
        let t = self.tables.read().await;
        Ok(owned(t.chats.get(&id), org_id, |s| s.organization_id).cloned())
    }

    async fn find_chat_by_key(
        &self,
        org_id: Uuid,
        connector_id: Option<Uuid>,
        external_session_key: &str,
    ) -> Result<Option<ChatSession>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.chats
            .values()
            .find(|s| {
                s.organization_id == org_id
                    && s.connector_id == connector_id
                    && s.external_session_key.as_deref() == Some(external_session_key)
            })
            .cloned())
    }

    async fn list_chats(
        &self,
        org_id: Uuid,
        chatbot_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatSession>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<&ChatSession> = t
            .chats
            .values()
            .filter(|s| s.organization_id == org_id)
            .filter(|s| chatbot_id.map_or(true, |bot| s.chatbot_id == bot))
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn append_messages(
        &self,
        org_id: Uuid,
        id: Uuid,
        append: MessageAppend,
    ) -> Result<Option<ChatSession>, StoreError> {
        let mut t = self.tables.write().await;
        let Some(s) = t.chats.get_mut(&id).filter(|s| s.organization_id == org_id) else {
            return Ok(None);
        };
        s.messages.extend(append.messages);
        if let Some(next) = append.transition {
            if s.status.follows_appends() {
                s.status = next;
            }
        }
        if let Some(patch) = &append.configuration {
            s.configuration = merge_configuration(&s.configuration, patch);
        }
        s.updated_at = Utc::now();
        Ok(Some(s.clone()))
    }

    async fn set_chat_status(
        &self,
        org_id: Uuid,
        id: Uuid,
        status: ChatStatus,
    ) -> Result<Option<ChatSession>, StoreError> {
        let mut t = self.tables.write().await;
        let Some(s) = t.chats.get_mut(&id).filter(|s| s.organization_id == org_id) else {
            return Ok(None);
        };
        if s.status.is_terminal() {
            return Ok(None);
        }
        s.status = status;
        s.updated_at = Utc::now();
        Ok(Some(s.clone()))
    }

    async fn set_chat_feedback(
        &self,
        org_id: Uuid,
        id: Uuid,
        feedback: i16,
    ) -> Result<Option<ChatSession>, StoreError> {
        let mut t = self.tables.write().await;
        let Some(s) = t.chats.get_mut(&id).filter(|s| s.organization_id == org_id) else {
            return Ok(None);
        };
        s.feedback = Some(feedback);
        s.updated_at = Utc::now();
        Ok(Some(s.clone()))
    }
}

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::integrations::ServiceType;
use crate::models::chat::{ChatSession, ChatStatus, MessageAppend, NewChatSession};
use crate::models::connector::{Chatbot, Connector, ConnectorPatch, NewConnector};
use crate::models::credential::{Credential, CredentialStatus, NewCredential};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("record is still referenced: {0}")]
    InUse(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return StoreError::UniqueViolation(constraint);
            }
            if db_err.is_foreign_key_violation() {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return StoreError::InUse(constraint);
            }
        }
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Database(other),
        }
    }
}

/// Tenant-scoped persistence used by the services.
///
/// Every read and write takes the organization id; a row owned by another
/// tenant behaves exactly like a missing one.
#[async_trait]
pub trait Store: Send + Sync {
    /// Readiness probe.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    // -- Credentials --

    async fn insert_credential(&self, new: NewCredential) -> Result<Credential, StoreError>;

    async fn get_credential(&self, org_id: Uuid, id: Uuid) -> Result<Option<Credential>, StoreError>;

    async fn list_credentials(
        &self,
        org_id: Uuid,
        service_type: Option<ServiceType>,
    ) -> Result<Vec<Credential>, StoreError>;

    async fn set_credential_status(
        &self,
        org_id: Uuid,
        id: Uuid,
        status: CredentialStatus,
    ) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::InUse`] while a connector references the credential.
    async fn delete_credential(&self, org_id: Uuid, id: Uuid) -> Result<bool, StoreError>;

    // -- Connectors --

    async fn insert_connector(&self, new: NewConnector) -> Result<Connector, StoreError>;

    async fn get_connector(&self, org_id: Uuid, id: Uuid) -> Result<Option<Connector>, StoreError>;

    async fn list_connectors(
        &self,
        org_id: Uuid,
        service_type: Option<ServiceType>,
    ) -> Result<Vec<Connector>, StoreError>;

    async fn update_connector(
        &self,
        org_id: Uuid,
        id: Uuid,
        patch: ConnectorPatch,
    ) -> Result<Option<Connector>, StoreError>;

    /// Fails with [`StoreError::InUse`] while chat sessions reference the connector.
    async fn delete_connector(&self, org_id: Uuid, id: Uuid) -> Result<bool, StoreError>;

    // -- Chatbots --

    async fn insert_chatbot(&self, org_id: Uuid, name: &str) -> Result<Chatbot, StoreError>;

    async fn get_chatbot(&self, org_id: Uuid, id: Uuid) -> Result<Option<Chatbot>, StoreError>;

    /// Unscoped lookup used by public webhooks to learn which tenant a chatbot belongs to.
    async fn chatbot_organization(&self, chatbot_id: Uuid) -> Result<Option<Uuid>, StoreError>;

    async fn link_connector(
        &self,
        org_id: Uuid,
        chatbot_id: Uuid,
        connector_id: Uuid,
    ) -> Result<(), StoreError>;

    async fn is_connector_linked(
        &self,
        org_id: Uuid,
        chatbot_id: Uuid,
        connector_id: Uuid,
    ) -> Result<bool, StoreError>;

    async fn find_linked_connector(
        &self,
        org_id: Uuid,
        chatbot_id: Uuid,
        service_type: ServiceType,
    ) -> Result<Option<Connector>, StoreError>;

    // -- Chat sessions --

    /// Fails with [`StoreError::UniqueViolation`] when a session already exists
    /// for the same (tenant, connector, external key).
    async fn insert_chat(&self, new: NewChatSession) -> Result<ChatSession, StoreError>;

    async fn get_chat(&self, org_id: Uuid, id: Uuid) -> Result<Option<ChatSession>, StoreError>;

    async fn find_chat_by_key(
        &self,
        org_id: Uuid,
        connector_id: Option<Uuid>,
        external_session_key: &str,
    ) -> Result<Option<ChatSession>, StoreError>;

    async fn list_chats(
        &self,
        org_id: Uuid,
        chatbot_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatSession>, StoreError>;

    /// Atomic append, serialized per session.
    async fn append_messages(
        &self,
        org_id: Uuid,
        id: Uuid,
        append: MessageAppend,
    ) -> Result<Option<ChatSession>, StoreError>;

    /// Leaves COMPLETED sessions untouched and returns `None` for them.
    async fn set_chat_status(
        &self,
        org_id: Uuid,
        id: Uuid,
        status: ChatStatus,
    ) -> Result<Option<ChatSession>, StoreError>;

    async fn set_chat_feedback(
        &self,
        org_id: Uuid,
        id: Uuid,
        feedback: i16,
    ) -> Result<Option<ChatSession>, StoreError>;
}

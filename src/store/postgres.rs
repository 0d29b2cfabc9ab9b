use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::integrations::ServiceType;
use crate::models::chat::{ChatSession, ChatStatus, Message, MessageAppend, NewChatSession};
use crate::models::connector::{Chatbot, Connector, ConnectorPatch, NewConnector};
use crate::models::credential::{Credential, CredentialStatus, NewCredential};

const CREDENTIAL_COLUMNS: &str =
    "id, organization_id, service_type, label, encrypted_blob, status, created_at, updated_at";

const CONNECTOR_COLUMNS: &str = "id, organization_id, name, service_type, credential_id, \
     configuration, is_active, created_at, updated_at";

const CHAT_COLUMNS: &str = "id, organization_id, chatbot_id, connector_id, external_session_key, \
     messages, status, feedback, configuration, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // -- Credential Operations --

    async fn insert_credential(&self, new: NewCredential) -> Result<Credential, StoreError> {
        let sql = format!(
            "INSERT INTO credentials (organization_id, service_type, label, encrypted_blob, status)
             VALUES ($1, $2, $3, $4, 'ACTIVE')
             RETURNING {CREDENTIAL_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CredentialRow>(&sql)
            .bind(new.organization_id)
            .bind(new.service_type.as_str())
            .bind(&new.label)
            .bind(&new.encrypted_blob)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn get_credential(&self, org_id: Uuid, id: Uuid) -> Result<Option<Credential>, StoreError> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE organization_id = $1 AND id = $2"
        );
        sqlx::query_as::<_, CredentialRow>(&sql)
            .bind(org_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Credential::try_from)
            .transpose()
    }

    async fn list_credentials(
        &self,
        org_id: Uuid,
        service_type: Option<ServiceType>,
    ) -> Result<Vec<Credential>, StoreError> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials
             WHERE organization_id = $1 AND ($2::text IS NULL OR service_type = $2)
             ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, CredentialRow>(&sql)
            .bind(org_id)
            .bind(service_type.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Credential::try_from)
            .collect()
    }

    async fn set_credential_status(
        &self,
        org_id: Uuid,
        id: Uuid,
        status: CredentialStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE credentials SET status = $3, updated_at = now()
             WHERE organization_id = $1 AND id = $2",
        )
        .bind(org_id)
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_credential(&self, org_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM credentials WHERE organization_id = $1 AND id = $2")
            .bind(org_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Connector Operations --

    async fn insert_connector(&self, new: NewConnector) -> Result<Connector, StoreError> {
        let sql = format!(
            "INSERT INTO connectors (organization_id, name, service_type, credential_id, configuration, is_active)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {CONNECTOR_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ConnectorRow>(&sql)
            .bind(new.organization_id)
            .bind(&new.name)
            .bind(new.service_type.as_str())
            .bind(new.credential_id)
            .bind(&new.configuration)
            .bind(new.is_active)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn get_connector(&self, org_id: Uuid, id: Uuid) -> Result<Option<Connector>, StoreError> {
        let sql = format!(
            "SELECT {CONNECTOR_COLUMNS} FROM connectors WHERE organization_id = $1 AND id = $2"
        );
        sqlx::query_as::<_, ConnectorRow>(&sql)
            .bind(org_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Connector::try_from)
            .transpose()
    }

    async fn list_connectors(
        &self,
        org_id: Uuid,
        service_type: Option<ServiceType>,
    ) -> Result<Vec<Connector>, StoreError> {
        let sql = format!(
            "SELECT {CONNECTOR_COLUMNS} FROM connectors
             WHERE organization_id = $1 AND ($2::text IS NULL OR service_type = $2)
             ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, ConnectorRow>(&sql)
            .bind(org_id)
            .bind(service_type.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Connector::try_from)
            .collect()
    }

    async fn update_connector(
        &self,
        org_id: Uuid,
        id: Uuid,
        patch: ConnectorPatch,
    ) -> Result<Option<Connector>, StoreError> {
        let sql = format!(
            "UPDATE connectors SET
                name = COALESCE($3, name),
                configuration = COALESCE($4, configuration),
                is_active = COALESCE($5, is_active),
                updated_at = now()
             WHERE organization_id = $1 AND id = $2
             RETURNING {CONNECTOR_COLUMNS}"
        );
        sqlx::query_as::<_, ConnectorRow>(&sql)
            .bind(org_id)
            .bind(id)
            .bind(patch.name)
            .bind(patch.configuration)
            .bind(patch.is_active)
            .fetch_optional(&self.pool)
            .await?
            .map(Connector::try_from)
            .transpose()
    }

    async fn delete_connector(&self, org_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM connectors WHERE organization_id = $1 AND id = $2")
            .bind(org_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Chatbot Operations --

    async fn insert_chatbot(&self, org_id: Uuid, name: &str) -> Result<Chatbot, StoreError> {
        let row = sqlx::query_as::<_, ChatbotRow>(
            "INSERT INTO chatbots (organization_id, name) VALUES ($1, $2)
             RETURNING id, organization_id, name, created_at",
        )
        .bind(org_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_chatbot(&self, org_id: Uuid, id: Uuid) -> Result<Option<Chatbot>, StoreError> {
        let row = sqlx::query_as::<_, ChatbotRow>(
            "SELECT id, organization_id, name, created_at FROM chatbots
             WHERE organization_id = $1 AND id = $2",
        )
        .bind(org_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Chatbot::from))
    }

    async fn chatbot_organization(&self, chatbot_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        let org = sqlx::query_scalar::<_, Uuid>("SELECT organization_id FROM chatbots WHERE id = $1")
            .bind(chatbot_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(org)
    }

    async fn link_connector(
        &self,
        org_id: Uuid,
        chatbot_id: Uuid,
        connector_id: Uuid,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO chatbot_connectors (chatbot_id, connector_id)
             SELECT b.id, c.id FROM chatbots b, connectors c
             WHERE b.id = $2 AND b.organization_id = $1
               AND c.id = $3 AND c.organization_id = $1
             ON CONFLICT DO NOTHING",
        )
        .bind(org_id)
        .bind(chatbot_id)
        .bind(connector_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0
            && !self.is_connector_linked(org_id, chatbot_id, connector_id).await?
        {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn is_connector_linked(
        &self,
        org_id: Uuid,
        chatbot_id: Uuid,
        connector_id: Uuid,
    ) -> Result<bool, StoreError> {
        let linked = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
                SELECT 1 FROM chatbot_connectors cc
                JOIN chatbots b ON b.id = cc.chatbot_id
                WHERE cc.chatbot_id = $2 AND cc.connector_id = $3 AND b.organization_id = $1
             )",
        )
        .bind(org_id)
        .bind(chatbot_id)
        .bind(connector_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(linked)
    }

    async fn find_linked_connector(
        &self,
        org_id: Uuid,
        chatbot_id: Uuid,
        service_type: ServiceType,
    ) -> Result<Option<Connector>, StoreError> {
        let sql = format!(
            "SELECT {} FROM connectors c
             JOIN chatbot_connectors cc ON cc.connector_id = c.id
             WHERE c.organization_id = $1 AND cc.chatbot_id = $2 AND c.service_type = $3
             ORDER BY c.is_active DESC, c.created_at ASC
             LIMIT 1",
            prefixed("c", CONNECTOR_COLUMNS)
        );
        sqlx::query_as::<_, ConnectorRow>(&sql)
            .bind(org_id)
            .bind(chatbot_id)
            .bind(service_type.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Connector::try_from)
            .transpose()
    }

    // -- Chat Session Operations --

    async fn insert_chat(&self, new: NewChatSession) -> Result<ChatSession, StoreError> {
        let sql = format!(
            "INSERT INTO chat_sessions
                (organization_id, chatbot_id, connector_id, external_session_key, messages, status, configuration)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {CHAT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(new.organization_id)
            .bind(new.chatbot_id)
            .bind(new.connector_id)
            .bind(&new.external_session_key)
            .bind(Json(&new.messages))
            .bind(new.status.as_str())
            .bind(&new.configuration)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn get_chat(&self, org_id: Uuid, id: Uuid) -> Result<Option<ChatSession>, StoreError> {
        let sql = format!(
            "SELECT {CHAT_COLUMNS} FROM chat_sessions WHERE organization_id = $1 AND id = $2"
        );
        sqlx::query_as::<_, ChatRow>(&sql)
            .bind(org_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ChatSession::try_from)
            .transpose()
    }

    async fn find_chat_by_key(
        &self,
        org_id: Uuid,
        connector_id: Option<Uuid>,
        external_session_key: &str,
    ) -> Result<Option<ChatSession>, StoreError> {
        let sql = format!(
            "SELECT {CHAT_COLUMNS} FROM chat_sessions
             WHERE organization_id = $1
               AND connector_id IS NOT DISTINCT FROM $2
               AND external_session_key = $3"
        );
        sqlx::query_as::<_, ChatRow>(&sql)
            .bind(org_id)
            .bind(connector_id)
            .bind(external_session_key)
            .fetch_optional(&self.pool)
            .await?
            .map(ChatSession::try_from)
            .transpose()
    }

    async fn list_chats(
        &self,
        org_id: Uuid,
        chatbot_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatSession>, StoreError> {
        let sql = format!(
            "SELECT {CHAT_COLUMNS} FROM chat_sessions
             WHERE organization_id = $1 AND ($2::uuid IS NULL OR chatbot_id = $2)
             ORDER BY updated_at DESC
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, ChatRow>(&sql)
            .bind(org_id)
            .bind(chatbot_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ChatSession::try_from)
            .collect()
    }

    async fn append_messages(
        &self,
        org_id: Uuid,
        id: Uuid,
        append: MessageAppend,
    ) -> Result<Option<ChatSession>, StoreError> {
        // Single UPDATE: the row lock serializes concurrent appends, and the
        // status guard is evaluated against the row being written.
        let sql = format!(
            "UPDATE chat_sessions SET
                messages = messages || $3::jsonb,
                status = CASE
                    WHEN $4::text IS NOT NULL AND status IN ('ACTIVE', 'PROCESSING') THEN $4::text
                    ELSE status
                END,
                configuration = CASE
                    WHEN $5::jsonb IS NULL THEN configuration
                    ELSE configuration || $5::jsonb
                END,
                updated_at = now()
             WHERE organization_id = $1 AND id = $2
             RETURNING {CHAT_COLUMNS}"
        );
        sqlx::query_as::<_, ChatRow>(&sql)
            .bind(org_id)
            .bind(id)
            .bind(Json(&append.messages))
            .bind(append.transition.map(|s| s.as_str()))
            .bind(append.configuration)
            .fetch_optional(&self.pool)
            .await?
            .map(ChatSession::try_from)
            .transpose()
    }

    async fn set_chat_status(
        &self,
        org_id: Uuid,
        id: Uuid,
        status: ChatStatus,
    ) -> Result<Option<ChatSession>, StoreError> {
        let sql = format!(
            "UPDATE chat_sessions SET status = $3, updated_at = now()
             WHERE organization_id = $1 AND id = $2 AND status <> 'COMPLETED'
             RETURNING {CHAT_COLUMNS}"
        );
        sqlx::query_as::<_, ChatRow>(&sql)
            .bind(org_id)
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(ChatSession::try_from)
            .transpose()
    }

    async fn set_chat_feedback(
        &self,
        org_id: Uuid,
        id: Uuid,
        feedback: i16,
    ) -> Result<Option<ChatSession>, StoreError> {
        let sql = format!(
            "UPDATE chat_sessions SET feedback = $3, updated_at = now()
             WHERE organization_id = $1 AND id = $2
             RETURNING {CHAT_COLUMNS}"
        );
        sqlx::query_as::<_, ChatRow>(&sql)
            .bind(org_id)
            .bind(id)
            .bind(feedback)
            .fetch_optional(&self.pool)
            .await?
            .map(ChatSession::try_from)
            .transpose()
    }
}

fn prefixed(alias: &str, columns: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{}.{}", alias, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_column<T: std::str::FromStr>(column: &str, raw: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", column, e)))
}

// -- Row Types --

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    organization_id: Uuid,
    service_type: String,
    label: String,
    encrypted_blob: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = StoreError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        Ok(Credential {
            id: row.id,
            organization_id: row.organization_id,
            service_type: parse_column::<ServiceType>("credentials.service_type", &row.service_type)?,
            label: row.label,
            encrypted_blob: row.encrypted_blob,
            status: parse_column::<CredentialStatus>("credentials.status", &row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConnectorRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    service_type: String,
    credential_id: Uuid,
    configuration: Value,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConnectorRow> for Connector {
    type Error = StoreError;

    fn try_from(row: ConnectorRow) -> Result<Self, Self::Error> {
        Ok(Connector {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            service_type: parse_column::<ServiceType>("connectors.service_type", &row.service_type)?,
            credential_id: row.credential_id,
            configuration: row.configuration,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChatbotRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<ChatbotRow> for Chatbot {
    fn from(row: ChatbotRow) -> Self {
        Chatbot {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChatRow {
    id: Uuid,
    organization_id: Uuid,
    chatbot_id: Uuid,
    connector_id: Option<Uuid>,
    external_session_key: Option<String>,
    messages: Json<Vec<Message>>,
    status: String,
    feedback: Option<i16>,
    configuration: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChatRow> for ChatSession {
    type Error = StoreError;

    fn try_from(row: ChatRow) -> Result<Self, Self::Error> {
        Ok(ChatSession {
            id: row.id,
            organization_id: row.organization_id,
            chatbot_id: row.chatbot_id,
            connector_id: row.connector_id,
            external_session_key: row.external_session_key,
            messages: row.messages.0,
            status: parse_column::<ChatStatus>("chat_sessions.status", &row.status)?,
            feedback: row.feedback,
            configuration: row.configuration,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_every_column() {
        assert_eq!(prefixed("c", "id, name"), "c.id, c.name");
    }

    #[test]
    fn corrupt_enum_column_is_reported() {
        let err = parse_column::<ChatStatus>("chat_sessions.status", "DONE").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(msg) if msg.contains("chat_sessions.status")));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::integrations::ServiceType;

/// Tenant-owned binding of a credential to service-specific configuration.
/// Covers both messaging interfaces and document knowledge bases.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connector {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub service_type: ServiceType,
    pub credential_id: Uuid,
    pub configuration: Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewConnector {
    pub organization_id: Uuid,
    pub name: String,
    pub service_type: ServiceType,
    pub credential_id: Uuid,
    pub configuration: Value,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectorPatch {
    pub name: Option<String>,
    pub configuration: Option<Value>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chatbot {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

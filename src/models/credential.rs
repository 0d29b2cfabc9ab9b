use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::integrations::ServiceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialStatus {
    Active,
    Invalid,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "ACTIVE",
            CredentialStatus::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(CredentialStatus::Active),
            "INVALID" => Ok(CredentialStatus::Invalid),
            other => Err(format!("unknown credential status '{}'", other)),
        }
    }
}

/// Stored credential. `encrypted_blob` is base64 of `nonce || sealed`.
///
/// Not `Serialize`: only [`CredentialDescriptor`] leaves the process.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub service_type: ServiceType,
    pub label: String,
    pub encrypted_blob: String,
    pub status: CredentialStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCredential {
    pub organization_id: Uuid,
    pub service_type: ServiceType,
    pub label: String,
    pub encrypted_blob: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialDescriptor {
    pub id: Uuid,
    pub service_type: ServiceType,
    pub label: String,
    pub status: CredentialStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Credential> for CredentialDescriptor {
    fn from(c: &Credential) -> Self {
        Self {
            id: c.id,
            service_type: c.service_type,
            label: c.label.clone(),
            status: c.status,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

//! Pluggable per-service behavior: configuration validation, live
//! connectivity tests and credential shape descriptions.

pub mod notion;
pub mod registry;
pub mod slack;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::vault::SecretMap;

pub use notion::{EmptyScopePolicy, NotionIntegration};
pub use registry::{IntegrationRegistry, RegistryError};
pub use slack::SlackIntegration;

/// Wire and storage tag of an external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Notion,
    Slack,
}

impl ServiceType {
    pub const ALL: [ServiceType; 2] = [ServiceType::Notion, ServiceType::Slack];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Notion => "NOTION",
            ServiceType::Slack => "SLACK",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOTION" => Ok(ServiceType::Notion),
            "SLACK" => Ok(ServiceType::Slack),
            other => Err(RegistryError::Unsupported(other.to_string())),
        }
    }
}

/// Outcome of a connectivity test that reached the provider.
///
/// `success: false` is a *logical* failure (bad or revoked secret). System
/// failures are reported as [`IntegrationError`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConnectionResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl TestConnectionResult {
    pub fn ok(message: impl Into<String>, details: Map<String, Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: None,
        }
    }

    /// Canonical display name reported by the provider, e.g. the bot name.
    pub fn display_name(&self) -> Option<&str> {
        self.details
            .as_ref()?
            .get("bot_name")?
            .as_str()
            .filter(|s| !s.is_empty())
    }
}

/// One entry of a credential shape description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialField {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
}

impl CredentialField {
    pub const fn required(name: &'static str, description: &'static str) -> Self {
        Self { name, required: true, description }
    }

    pub const fn optional(name: &'static str, description: &'static str) -> Self {
        Self { name, required: false, description }
    }
}

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("{service} request failed: {source}")]
    Transport {
        service: ServiceType,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} did not answer within {timeout:?}")]
    Timeout {
        service: ServiceType,
        timeout: Duration,
    },

    #[error("unexpected {service} response: {detail}")]
    Protocol {
        service: ServiceType,
        detail: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("invalid {service} configuration: {reason}")]
    Malformed { service: ServiceType, reason: String },

    #[error("invalid {service} configuration: {reason}")]
    Rejected { service: ServiceType, reason: String },
}

/// Capability contract every supported service implements.
#[async_trait]
pub trait Integration: Send + Sync {
    fn service_type(&self) -> ServiceType;

    /// Accepts or rejects connector configuration. `Value::Null` means absent.
    fn validate_config(&self, config: &Value) -> Result<(), ConfigValidationError>;

    async fn test_connection(
        &self,
        secrets: &SecretMap,
    ) -> Result<TestConnectionResult, IntegrationError>;

    fn credential_schema(&self) -> Vec<CredentialField>;

    fn supports_connection_test(&self) -> bool {
        true
    }
}

/// Treats `null` and `{}` the same way: nothing configured.
pub(crate) fn is_empty_config(config: &Value) -> bool {
    match config {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

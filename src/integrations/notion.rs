use std::str::FromStr;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    is_empty_config, ConfigValidationError, CredentialField, Integration, IntegrationError,
    ServiceType, TestConnectionResult,
};
use crate::vault::SecretMap;

pub const DEFAULT_NOTION_API_BASE: &str = "https://api.notion.com";
pub const NOTION_VERSION: &str = "2022-06-28";

static NOTION_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:[0-9a-fA-F]{32}|[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})$",
    )
    .expect("notion id pattern is valid")
});

/// What an empty object-id list on a knowledge-base connector means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyScopePolicy {
    /// Nothing listed: every page the integration was shared with is in scope.
    #[default]
    AllPermitted,
    /// At least one object id must be listed.
    Reject,
}

impl FromStr for EmptyScopePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "all_permitted" => Ok(EmptyScopePolicy::AllPermitted),
            "reject" => Ok(EmptyScopePolicy::Reject),
            other => Err(format!(
                "unknown empty scope policy '{}', expected 'all' or 'reject'",
                other
            )),
        }
    }
}

/// Connector configuration for a Notion knowledge base.
#[derive(Debug, Default, Deserialize)]
pub struct NotionKbConfig {
    #[serde(default)]
    pub notion_object_ids: Option<Vec<String>>,
    #[serde(default)]
    pub sync_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotionUser {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotionApiError {
    code: String,
    message: String,
}

pub struct NotionIntegration {
    client: reqwest::Client,
    api_base: String,
    empty_scope: EmptyScopePolicy,
}

impl NotionIntegration {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>, empty_scope: EmptyScopePolicy) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            empty_scope,
        }
    }

    fn rejected(reason: impl Into<String>) -> ConfigValidationError {
        ConfigValidationError::Rejected {
            service: ServiceType::Notion,
            reason: reason.into(),
        }
    }
}

pub fn is_valid_notion_id(id: &str) -> bool {
    NOTION_ID.is_match(id)
}

#[async_trait]
impl Integration for NotionIntegration {
    fn service_type(&self) -> ServiceType {
        ServiceType::Notion
    }

    fn validate_config(&self, config: &Value) -> Result<(), ConfigValidationError> {
        let parsed = if is_empty_config(config) {
            NotionKbConfig::default()
        } else {
            serde_json::from_value::<NotionKbConfig>(config.clone()).map_err(|e| {
                ConfigValidationError::Malformed {
                    service: ServiceType::Notion,
                    reason: e.to_string(),
                }
            })?
        };

        let ids = parsed.notion_object_ids.unwrap_or_default();
        if ids.is_empty() {
            return match self.empty_scope {
                EmptyScopePolicy::AllPermitted => {
                    tracing::info!("notion connector lists no object ids; all shared pages are in scope");
                    Ok(())
                }
                EmptyScopePolicy::Reject => {
                    Err(Self::rejected("notion_object_ids must list at least one page or database id"))
                }
            };
        }

        if let Some(bad) = ids.iter().find(|id| !is_valid_notion_id(id)) {
            return Err(Self::rejected(format!("'{}' is not a Notion object id", bad)));
        }
        Ok(())
    }

    async fn test_connection(
        &self,
        secrets: &SecretMap,
    ) -> Result<TestConnectionResult, IntegrationError> {
        let Some(secret) = secrets.non_empty("internal_integration_secret") else {
            return Ok(TestConnectionResult::failed(
                "Missing or empty 'internal_integration_secret' in Notion credentials",
            ));
        };

        let url = format!("{}/v1/users/me", self.api_base);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(secret)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .map_err(|source| IntegrationError::Transport {
                service: ServiceType::Notion,
                source,
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(TestConnectionResult::failed(
                "Notion API Error: Invalid API key (Unauthorized).",
            ));
        }

        let body = resp.bytes().await.map_err(|source| IntegrationError::Transport {
            service: ServiceType::Notion,
            source,
        })?;

        if !status.is_success() {
            return match serde_json::from_slice::<NotionApiError>(&body) {
                Ok(err) => {
                    tracing::info!(status = %status, code = %err.code, "notion rejected credentials");
                    Ok(TestConnectionResult::failed(format!(
                        "Notion API error ({}): {}",
                        err.code, err.message
                    )))
                }
                Err(_) => Err(IntegrationError::Protocol {
                    service: ServiceType::Notion,
                    detail: format!("users/me returned HTTP {} without an error body", status),
                }),
            };
        }

        let user: NotionUser = serde_json::from_slice(&body).map_err(|e| IntegrationError::Protocol {
            service: ServiceType::Notion,
            detail: format!("users/me body was not understood: {}", e),
        })?;

        let mut details = Map::new();
        if user.kind.as_deref() == Some("bot") {
            if let Some(name) = &user.name {
                details.insert("bot_name".into(), Value::String(name.clone()));
            }
        }
        if let Some(id) = user.id {
            details.insert("user_id".into(), Value::String(id));
        }

        Ok(TestConnectionResult::ok("Successfully connected to Notion.", details))
    }

    fn credential_schema(&self) -> Vec<CredentialField> {
        vec![CredentialField::required(
            "internal_integration_secret",
            "Internal integration secret from the Notion integration settings",
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notion(policy: EmptyScopePolicy) -> NotionIntegration {
        NotionIntegration::new(reqwest::Client::new(), "http://127.0.0.1:9", policy)
    }

    #[test]
    fn empty_scope_follows_policy() {
        let permissive = notion(EmptyScopePolicy::AllPermitted);
        assert!(permissive.validate_config(&Value::Null).is_ok());
        assert!(permissive.validate_config(&json!({"notion_object_ids": []})).is_ok());

        let strict = notion(EmptyScopePolicy::Reject);
        assert!(matches!(
            strict.validate_config(&Value::Null),
            Err(ConfigValidationError::Rejected { .. })
        ));
        assert!(strict
            .validate_config(&json!({"notion_object_ids": ["0123456789abcdef0123456789abcdef"]}))
            .is_ok());
    }

    #[test]
    fn object_ids_must_look_like_notion_ids() {
        let n = notion(EmptyScopePolicy::AllPermitted);
        assert!(n
            .validate_config(&json!({"notion_object_ids": ["01234567-89ab-cdef-0123-456789abcdef"]}))
            .is_ok());
        assert!(matches!(
            n.validate_config(&json!({"notion_object_ids": ["not-an-id"]})),
            Err(ConfigValidationError::Rejected { .. })
        ));
    }

    #[test]
    fn malformed_config_is_an_error() {
        let n = notion(EmptyScopePolicy::AllPermitted);
        assert!(matches!(
            n.validate_config(&json!({"notion_object_ids": "abc"})),
            Err(ConfigValidationError::Malformed { .. })
        ));
        assert!(matches!(
            n.validate_config(&json!("text")),
            Err(ConfigValidationError::Malformed { .. })
        ));
    }

    #[test]
    fn policy_parses_from_env_values() {
        assert_eq!("all".parse::<EmptyScopePolicy>().unwrap(), EmptyScopePolicy::AllPermitted);
        assert_eq!("REJECT".parse::<EmptyScopePolicy>().unwrap(), EmptyScopePolicy::Reject);
        assert!("maybe".parse::<EmptyScopePolicy>().is_err());
    }

    #[tokio::test]
    async fn missing_secret_is_a_logical_failure() {
        let result = notion(EmptyScopePolicy::AllPermitted)
            .test_connection(&SecretMap::new())
            .await
            .unwrap();
        assert!(!result.success);
    }
}

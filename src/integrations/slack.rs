use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    is_empty_config, ConfigValidationError, CredentialField, Integration, IntegrationError,
    ServiceType, TestConnectionResult,
};
use crate::vault::SecretMap;

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

/// Connector configuration for a Slack interface.
#[derive(Debug, Default, Deserialize)]
pub struct SlackInterfaceConfig {
    pub slack_team_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    team_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

pub struct SlackIntegration {
    client: reqwest::Client,
    api_base: String,
}

impl SlackIntegration {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Human-readable text for Slack `ok:false` error codes.
pub fn describe_api_error(code: &str) -> String {
    match code {
        "invalid_auth" => "Slack API Error: Invalid authentication token (bot_token).".into(),
        "not_authed" => "Slack API Error: Not authenticated (check token scopes?).".into(),
        "account_inactive" => "Slack API Error: The workspace or bot account is inactive.".into(),
        "token_revoked" => "Slack API Error: The bot token has been revoked.".into(),
        "token_expired" => "Slack API Error: The bot token has expired.".into(),
        other => format!("Slack API Error: {}", other),
    }
}

#[async_trait]
impl Integration for SlackIntegration {
    fn service_type(&self) -> ServiceType {
        ServiceType::Slack
    }

    fn validate_config(&self, config: &Value) -> Result<(), ConfigValidationError> {
        if is_empty_config(config) {
            return Ok(());
        }
        let parsed: SlackInterfaceConfig =
            serde_json::from_value(config.clone()).map_err(|e| ConfigValidationError::Malformed {
                service: ServiceType::Slack,
                reason: e.to_string(),
            })?;
        if let Some(team) = &parsed.slack_team_id {
            if team.trim().is_empty() {
                return Err(ConfigValidationError::Rejected {
                    service: ServiceType::Slack,
                    reason: "slack_team_id must not be empty".into(),
                });
            }
        }
        Ok(())
    }

    async fn test_connection(
        &self,
        secrets: &SecretMap,
    ) -> Result<TestConnectionResult, IntegrationError> {
        let Some(token) = secrets.non_empty("bot_token") else {
            return Ok(TestConnectionResult::failed(
                "Missing or empty 'bot_token' in Slack credentials",
            ));
        };
        if secrets.non_empty("signing_secret").is_none() {
            tracing::warn!("slack credentials have no signing_secret; inbound webhooks cannot be verified");
        }

        let url = format!("{}/auth.test", self.api_base);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| IntegrationError::Transport {
                service: ServiceType::Slack,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(IntegrationError::Protocol {
                service: ServiceType::Slack,
                detail: format!("auth.test returned HTTP {}", status),
            });
        }

        let body: AuthTestResponse = resp.json().await.map_err(|e| IntegrationError::Protocol {
            service: ServiceType::Slack,
            detail: format!("auth.test body was not understood: {}", e),
        })?;

        if !body.ok {
            let code = body.error.unwrap_or_else(|| "unknown_error".into());
            tracing::info!(error_code = %code, "slack auth.test rejected credentials");
            return Ok(TestConnectionResult::failed(describe_api_error(&code)));
        }

        let team = body.team.unwrap_or_default();
        let user = body.user.unwrap_or_default();
        let mut details = Map::new();
        details.insert("bot_name".into(), Value::String(user.clone()));
        details.insert("bot_user_id".into(), body.user_id.map(Value::String).unwrap_or(Value::Null));
        details.insert("team_id".into(), body.team_id.map(Value::String).unwrap_or(Value::Null));
        details.insert("team".into(), Value::String(team.clone()));

        Ok(TestConnectionResult::ok(
            format!("Successfully connected to Slack workspace '{}' as '{}'.", team, user),
            details,
        ))
    }

    fn credential_schema(&self) -> Vec<CredentialField> {
        vec![
            CredentialField::required("bot_token", "Bot user OAuth token (xoxb-...)"),
            CredentialField::optional(
                "signing_secret",
                "App signing secret, needed to verify inbound event signatures",
            ),
            CredentialField::optional("client_id", "OAuth client id"),
            CredentialField::optional("client_secret", "OAuth client secret"),
        ]
    }
}

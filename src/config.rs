use std::time::Duration;

use rand::RngCore;

use crate::integrations::notion::DEFAULT_NOTION_API_BASE;
use crate::integrations::slack::DEFAULT_SLACK_API_BASE;
use crate::integrations::EmptyScopePolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// 64 hex characters. Checked again when the vault is built.
    pub master_key: String,
    pub jwt_secret: String,
    /// Deadline for every outbound call (connection tests and dispatch).
    /// Set via CHATHUB_OUTBOUND_TIMEOUT_SECS. Default: 10.
    pub outbound_timeout: Duration,
    /// Set via CHATHUB_NOTION_EMPTY_SCOPE (`all` | `reject`). Default: all.
    pub notion_empty_scope: EmptyScopePolicy,
    pub slack_api_base: String,
    pub notion_api_base: String,
    pub dashboard_origin: Option<String>,
    pub environment: String,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Builds a [`Config`] from an arbitrary variable source.
pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let environment = var("CHATHUB_ENV")
        .or_else(|| var("RUST_ENV"))
        .unwrap_or_else(|| "development".into());
    let production = environment == "production";

    let master_key = var("CHATHUB_MASTER_KEY").ok_or_else(|| {
        anyhow::anyhow!("CHATHUB_MASTER_KEY is required (64 hex chars, generate one with `chathub keygen`)")
    })?;

    let jwt_secret = match var("CHATHUB_JWT_SECRET") {
        Some(secret) if !secret.trim().is_empty() => secret,
        _ if production => anyhow::bail!("CHATHUB_JWT_SECRET must be set in production"),
        _ => {
            eprintln!("⚠️  CHATHUB_JWT_SECRET is not set; using a random per-process secret. Tokens will not survive a restart.");
            ephemeral_secret()
        }
    };

    let notion_empty_scope = match var("CHATHUB_NOTION_EMPTY_SCOPE") {
        Some(raw) => raw.parse::<EmptyScopePolicy>().map_err(|e| anyhow::anyhow!(e))?,
        None => EmptyScopePolicy::default(),
    };

    Ok(Config {
        port: var("CHATHUB_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080),
        database_url: var("DATABASE_URL").unwrap_or_else(|| "postgres://localhost/chathub".into()),
        master_key,
        jwt_secret,
        outbound_timeout: Duration::from_secs(
            var("CHATHUB_OUTBOUND_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(10),
        ),
        notion_empty_scope,
        slack_api_base: api_base(&var, "CHATHUB_SLACK_API_BASE", DEFAULT_SLACK_API_BASE)?,
        notion_api_base: api_base(&var, "CHATHUB_NOTION_API_BASE", DEFAULT_NOTION_API_BASE)?,
        dashboard_origin: var("DASHBOARD_ORIGIN").filter(|v| !v.is_empty()),
        environment,
    })
}

fn ephemeral_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn api_base(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> anyhow::Result<String> {
    let raw = var(key).unwrap_or_else(|| default.to_string());
    let parsed = url::Url::parse(&raw).map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", key, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("{} must be an http(s) URL", key);
    }
    Ok(raw.trim_end_matches('/').to_string())
}

//! Chathub: multi-tenant credential vault and conversational connector hub.
//!
//! The binary in `main.rs` wires these modules into an HTTP server; the
//! integration tests in `tests/` drive them directly.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod integrations;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;
pub mod transport;
pub mod vault;

use std::sync::Arc;

use config::Config;
use integrations::{IntegrationRegistry, NotionIntegration, ServiceType, SlackIntegration};
use metrics::HubMetrics;
use services::{ChatService, ConnectorService, CredentialService, Dispatcher, EchoReplyGenerator, ReplyGenerator};
use store::Store;
use transport::{SlackSender, Transports};
use vault::VaultCrypto;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub registry: Arc<IntegrationRegistry>,
    pub credentials: Arc<CredentialService>,
    pub connectors: Arc<ConnectorService>,
    pub chats: Arc<ChatService>,
    pub dispatcher: Arc<Dispatcher>,
    pub replies: Arc<dyn ReplyGenerator>,
    pub metrics: Arc<HubMetrics>,
}

impl AppState {
    /// Wires every service on top of `store`. Fails fast on a bad master key
    /// or an incomplete integration registry.
    pub fn build(config: Config, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        let vault = Arc::new(VaultCrypto::new(&config.master_key)?);
        let metrics = Arc::new(HubMetrics::new()?);

        let client = reqwest::Client::builder()
            .timeout(config.outbound_timeout)
            .user_agent(concat!("chathub/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let registry = Arc::new(
            IntegrationRegistry::builder()
                .register(SlackIntegration::new(client.clone(), config.slack_api_base.clone()))
                .register(NotionIntegration::new(
                    client.clone(),
                    config.notion_api_base.clone(),
                    config.notion_empty_scope,
                ))
                .build(),
        );
        registry.require(&ServiceType::ALL)?;

        let transports = Transports::new().with(SlackSender::new(client, config.slack_api_base.clone()));

        let credentials = Arc::new(CredentialService::new(
            store.clone(),
            vault,
            registry.clone(),
            metrics.clone(),
        ));
        let connectors = Arc::new(ConnectorService::new(store.clone(), registry.clone()));
        let chats = Arc::new(ChatService::new(store.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            chats.clone(),
            credentials.clone(),
            transports,
            metrics.clone(),
        ));

        Ok(Self {
            config,
            store,
            registry,
            credentials,
            connectors,
            chats,
            dispatcher,
            replies: Arc::new(EchoReplyGenerator),
            metrics,
        })
    }

    pub fn with_reply_generator(mut self, replies: Arc<dyn ReplyGenerator>) -> Self {
        self.replies = replies;
        self
    }
}

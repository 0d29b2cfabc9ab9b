//! Outbound delivery of replies to the external platform a session came from.

pub mod slack;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::integrations::ServiceType;
use crate::models::chat::ChatSession;
use crate::vault::SecretMap;

pub use slack::SlackSender;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("credential is missing required secret '{0}'")]
    MissingSecret(&'static str),

    #[error("cannot address reply: {0}")]
    Addressing(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("platform rejected message: {0}")]
    Rejected(String),
}

/// Sends one outbound message using a decrypted credential.
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn service_type(&self) -> ServiceType;

    async fn send(
        &self,
        secrets: &SecretMap,
        session: &ChatSession,
        text: &str,
    ) -> Result<(), TransportError>;
}

/// Senders keyed by service type. Built once at startup.
#[derive(Clone, Default)]
pub struct Transports {
    senders: HashMap<ServiceType, Arc<dyn MessageSender>>,
}

impl Transports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sender: impl MessageSender + 'static) -> Self {
        self.senders.insert(sender.service_type(), Arc::new(sender));
        self
    }

    pub fn get(&self, service_type: ServiceType) -> Option<Arc<dyn MessageSender>> {
        self.senders.get(&service_type).cloned()
    }
}

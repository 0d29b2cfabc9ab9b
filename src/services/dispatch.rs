use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::chat::ChatService;
use super::credentials::CredentialService;
use crate::errors::AppError;
use crate::integrations::ServiceType;
use crate::metrics::HubMetrics;
use crate::models::chat::ChatSession;
use crate::store::Store;
use crate::transport::{TransportError, Transports};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("connector {0} no longer exists")]
    ConnectorNotFound(Uuid),

    #[error("connector {0} is inactive")]
    ConnectorInactive(Uuid),

    #[error("bound credential unavailable: {0}")]
    Credential(String),

    #[error("no outbound transport for {0}")]
    NoTransport(ServiceType),

    #[error("delivery failed: {0}")]
    Transport(#[from] TransportError),

    #[error("delivery did not finish within {0:?}")]
    Timeout(Duration),

    #[error("lookup failed: {0}")]
    Lookup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Session has no bound connector.
    Skipped,
}

/// Dispatch result as reported next to a committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchReport {
    Delivered,
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Serialize)]
pub struct ReplyOutcome {
    pub session: ChatSession,
    pub dispatch: DispatchReport,
}

/// Best-effort outbound delivery of replies.
///
/// Nothing here holds a lock on the session while waiting on the network,
/// and no failure here rolls back a message that was already appended.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    chats: Arc<ChatService>,
    credentials: Arc<CredentialService>,
    transports: Transports,
    metrics: Arc<HubMetrics>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        chats: Arc<ChatService>,
        credentials: Arc<CredentialService>,
        transports: Transports,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self { store, chats, credentials, transports, metrics }
    }

    pub async fn dispatch(
        &self,
        org_id: Uuid,
        session: &ChatSession,
        text: &str,
        deadline: Duration,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(connector_id) = session.connector_id else {
            return Ok(DispatchOutcome::Skipped);
        };

        let connector = self
            .store
            .get_connector(org_id, connector_id)
            .await
            .map_err(|e| DispatchError::Lookup(e.to_string()))?
            .ok_or(DispatchError::ConnectorNotFound(connector_id))?;
        if !connector.is_active {
            return Err(DispatchError::ConnectorInactive(connector_id));
        }

        let (credential, secrets) = self
            .credentials
            .decrypt_for_use(org_id, connector.credential_id)
            .await
            .map_err(|e| DispatchError::Credential(e.to_string()))?;
        if credential.service_type != connector.service_type {
            return Err(DispatchError::Credential(format!(
                "credential {} is {} but connector is {}",
                credential.id, credential.service_type, connector.service_type
            )));
        }

        let sender = self
            .transports
            .get(connector.service_type)
            .ok_or(DispatchError::NoTransport(connector.service_type))?;

        match tokio::time::timeout(deadline, sender.send(&secrets, session, text)).await {
            Ok(result) => result?,
            Err(_) => return Err(DispatchError::Timeout(deadline)),
        }

        tracing::info!(chat_id = %session.id, connector_id = %connector_id, "reply dispatched");
        Ok(DispatchOutcome::Delivered)
    }

    /// Runs [`Dispatcher::dispatch`] and folds the result into a report.
    /// Failures are logged and counted, never propagated.
    pub async fn report(
        &self,
        org_id: Uuid,
        session: &ChatSession,
        text: &str,
        deadline: Duration,
    ) -> DispatchReport {
        let report = match self.dispatch(org_id, session, text, deadline).await {
            Ok(DispatchOutcome::Delivered) => DispatchReport::Delivered,
            Ok(DispatchOutcome::Skipped) => DispatchReport::Skipped,
            Err(e) => {
                tracing::warn!(chat_id = %session.id, error = %e, "reply dispatch failed");
                DispatchReport::Failed { reason: e.to_string() }
            }
        };
        self.metrics.dispatch(match report {
            DispatchReport::Delivered => "delivered",
            DispatchReport::Skipped => "skipped",
            DispatchReport::Failed { .. } => "failed",
        });
        report
    }

    /// Appends the assistant reply, then (optionally) delivers it.
    ///
    /// The append is committed before dispatch starts, so a dispatch failure
    /// shows up only in the returned report.
    pub async fn record_reply(
        &self,
        org_id: Uuid,
        chat_id: Uuid,
        text: &str,
        metadata: Option<Value>,
        send_to_interface: bool,
        deadline: Duration,
    ) -> Result<ReplyOutcome, AppError> {
        let session = self.chats.append_assistant(org_id, chat_id, text, metadata).await?;
        let dispatch = if send_to_interface {
            self.report(org_id, &session, text, deadline).await
        } else {
            DispatchReport::Skipped
        };
        Ok(ReplyOutcome { session, dispatch })
    }
}

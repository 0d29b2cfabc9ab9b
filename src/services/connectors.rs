use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::integrations::{IntegrationRegistry, ServiceType};
use crate::models::connector::{Chatbot, Connector, ConnectorPatch, NewConnector};
use crate::store::{Store, StoreError};

#[derive(Debug, Deserialize)]
pub struct CreateConnector {
    pub name: String,
    pub credential_id: Uuid,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub configuration: Option<Value>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

pub struct ConnectorService {
    store: Arc<dyn Store>,
    registry: Arc<IntegrationRegistry>,
}

impl ConnectorService {
    pub fn new(store: Arc<dyn Store>, registry: Arc<IntegrationRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn create(&self, org_id: Uuid, req: CreateConnector) -> Result<Connector, AppError> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".into()));
        }

        let credential = self
            .store
            .get_credential(org_id, req.credential_id)
            .await?
            .ok_or_else(|| AppError::NotFound("credential".into()))?;

        if let Some(tag) = req.service_type.as_deref() {
            let requested: ServiceType = tag.parse()?;
            if requested != credential.service_type {
                return Err(AppError::Validation(format!(
                    "credential {} is a {} credential and cannot back a {} connector",
                    credential.id, credential.service_type, requested
                )));
            }
        }

        let configuration = req.configuration.unwrap_or(Value::Null);
        self.registry
            .get_type(credential.service_type)?
            .validate_config(&configuration)?;

        let connector = self
            .store
            .insert_connector(NewConnector {
                organization_id: org_id,
                name: name.to_string(),
                service_type: credential.service_type,
                credential_id: credential.id,
                configuration: normalize(configuration),
                is_active: req.is_active.unwrap_or(true),
            })
            .await
            .map_err(insert_failure)?;

        tracing::info!(
            connector_id = %connector.id,
            service_type = %connector.service_type,
            "created connector"
        );
        Ok(connector)
    }

    pub async fn get(&self, org_id: Uuid, id: Uuid) -> Result<Connector, AppError> {
        self.store
            .get_connector(org_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound("connector".into()))
    }

    pub async fn list(&self, org_id: Uuid, service_type: Option<&str>) -> Result<Vec<Connector>, AppError> {
        let filter = service_type.map(str::parse::<ServiceType>).transpose()?;
        Ok(self.store.list_connectors(org_id, filter).await?)
    }

    pub async fn update(&self, org_id: Uuid, id: Uuid, mut patch: ConnectorPatch) -> Result<Connector, AppError> {
        let current = self.get(org_id, id).await?;

        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(AppError::Validation("name must not be empty".into()));
            }
            patch.name = Some(name.trim().to_string());
        }
        if let Some(configuration) = patch.configuration.take() {
            self.registry
                .get_type(current.service_type)?
                .validate_config(&configuration)?;
            patch.configuration = Some(normalize(configuration));
        }

        self.store
            .update_connector(org_id, id, patch)
            .await?
            .ok_or_else(|| AppError::NotFound("connector".into()))
    }

    pub async fn delete(&self, org_id: Uuid, id: Uuid) -> Result<(), AppError> {
        match self.store.delete_connector(org_id, id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::NotFound("connector".into())),
            Err(StoreError::InUse(_)) => Err(AppError::ConflictInUse("connector".into())),
            Err(e) => Err(e.into()),
        }
    }

    // -- Chatbot primitives --

    pub async fn create_chatbot(&self, org_id: Uuid, name: &str) -> Result<Chatbot, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".into()));
        }
        Ok(self.store.insert_chatbot(org_id, name).await?)
    }

    pub async fn link(&self, org_id: Uuid, chatbot_id: Uuid, connector_id: Uuid) -> Result<(), AppError> {
        match self.store.link_connector(org_id, chatbot_id, connector_id).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(AppError::NotFound("chatbot or connector".into())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Stored configuration is always a JSON object.
fn normalize(configuration: Value) -> Value {
    match configuration {
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}

/// The credential FK is the only reference a new connector holds, so a
/// violation on insert means the credential vanished after it was read.
fn insert_failure(err: StoreError) -> AppError {
    match err {
        StoreError::InUse(_) => AppError::NotFound("credential".into()),
        other => other.into(),
    }
}

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::integrations::{
    Integration, IntegrationError, IntegrationRegistry, ServiceType, TestConnectionResult,
};
use crate::metrics::HubMetrics;
use crate::models::credential::{Credential, CredentialDescriptor, CredentialStatus, NewCredential};
use crate::store::{Store, StoreError};
use crate::vault::{SecretMap, VaultCrypto, VaultError};

const DECRYPT_FAILED_MESSAGE: &str = "Failed to decrypt credentials for testing.";

#[derive(Debug, Deserialize)]
pub struct CreateCredential {
    pub service_type: String,
    #[serde(default)]
    pub label: Option<String>,
    pub secrets: SecretMap,
}

/// Validates, tests, seals and persists third-party secrets.
///
/// The only path that hands plaintext back out is [`CredentialService::decrypt_for_use`].
pub struct CredentialService {
    store: Arc<dyn Store>,
    vault: Arc<VaultCrypto>,
    registry: Arc<IntegrationRegistry>,
    metrics: Arc<HubMetrics>,
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn Store>,
        vault: Arc<VaultCrypto>,
        registry: Arc<IntegrationRegistry>,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self { store, vault, registry, metrics }
    }

    pub fn registry(&self) -> &IntegrationRegistry {
        &self.registry
    }

    pub async fn create(
        &self,
        org_id: Uuid,
        req: CreateCredential,
        deadline: Duration,
    ) -> Result<CredentialDescriptor, AppError> {
        let tag = req.service_type.trim();
        if tag.is_empty() {
            return Err(AppError::Validation("service_type is required".into()));
        }
        if req.secrets.is_empty() {
            return Err(AppError::Validation("credentials must contain at least one secret".into()));
        }
        let integration = self.registry.get(tag)?;
        let service_type = integration.service_type();

        let mut label = req
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("{} credential", service_type));

        if integration.supports_connection_test() {
            let result = self.run_test(integration.as_ref(), &req.secrets, deadline).await?;
            if !result.success {
                tracing::info!(
                    service_type = %service_type,
                    secret_keys = ?req.secrets.key_names(),
                    "pre-flight credential test failed"
                );
                return Err(AppError::CredentialTestFailed(result.message));
            }
            if let Some(name) = result.display_name() {
                label = name.to_string();
            }
        }

        let sealed = self.vault.seal_secrets(&req.secrets)?;
        let encrypted_blob = base64::engine::general_purpose::STANDARD.encode(sealed);

        let credential = self
            .store
            .insert_credential(NewCredential {
                organization_id: org_id,
                service_type,
                label,
                encrypted_blob,
            })
            .await?;

        tracing::info!(
            credential_id = %credential.id,
            service_type = %service_type,
            secret_keys = ?req.secrets.key_names(),
            "stored credential"
        );
        Ok(CredentialDescriptor::from(&credential))
    }

    pub async fn get(&self, org_id: Uuid, id: Uuid) -> Result<CredentialDescriptor, AppError> {
        let credential = self.load(org_id, id).await?;
        Ok(CredentialDescriptor::from(&credential))
    }

    pub async fn list(
        &self,
        org_id: Uuid,
        service_type: Option<&str>,
    ) -> Result<Vec<CredentialDescriptor>, AppError> {
        let filter = service_type
            .map(|tag| tag.parse::<ServiceType>())
            .transpose()?;
        let rows = self.store.list_credentials(org_id, filter).await?;
        Ok(rows.iter().map(CredentialDescriptor::from).collect())
    }

    pub async fn delete(&self, org_id: Uuid, id: Uuid) -> Result<(), AppError> {
        match self.store.delete_credential(org_id, id).await {
            Ok(true) => {
                tracing::info!(credential_id = %id, "deleted credential");
                Ok(())
            }
            Ok(false) => Err(AppError::NotFound("credential".into())),
            Err(StoreError::InUse(_)) => Err(AppError::ConflictInUse("credential".into())),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-tests a stored credential and records the outcome as its status.
    pub async fn test(
        &self,
        org_id: Uuid,
        id: Uuid,
        deadline: Duration,
    ) -> Result<TestConnectionResult, AppError> {
        let credential = self.load(org_id, id).await?;
        let integration = self.registry.get_type(credential.service_type)?;

        let secrets = match self.open(&credential) {
            Ok(secrets) => secrets,
            Err(e) => {
                tracing::warn!(credential_id = %id, error = %e, "stored credential could not be decrypted");
                self.record_status(&credential, CredentialStatus::Invalid).await?;
                self.metrics
                    .credential_test(credential.service_type.as_str(), "failure");
                return Ok(TestConnectionResult::failed(DECRYPT_FAILED_MESSAGE));
            }
        };

        tracing::debug!(
            credential_id = %id,
            secret_keys = ?secrets.key_names(),
            "testing stored credential"
        );

        let result = self.run_test(integration.as_ref(), &secrets, deadline).await?;
        let status = if result.success {
            CredentialStatus::Active
        } else {
            CredentialStatus::Invalid
        };
        self.record_status(&credential, status).await?;
        Ok(result)
    }

    /// Decrypted secrets for outbound delivery. Never serialize the result.
    pub async fn decrypt_for_use(
        &self,
        org_id: Uuid,
        id: Uuid,
    ) -> Result<(Credential, SecretMap), AppError> {
        let credential = self.load(org_id, id).await?;
        let secrets = self.open(&credential)?;
        Ok((credential, secrets))
    }

    async fn load(&self, org_id: Uuid, id: Uuid) -> Result<Credential, AppError> {
        self.store
            .get_credential(org_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound("credential".into()))
    }

    fn open(&self, credential: &Credential) -> Result<SecretMap, VaultError> {
        let sealed = base64::engine::general_purpose::STANDARD
            .decode(credential.encrypted_blob.as_bytes())
            .map_err(|_| VaultError::AuthenticationFailed)?;
        self.vault.open_secrets(&sealed)
    }

    async fn record_status(&self, credential: &Credential, status: CredentialStatus) -> Result<(), AppError> {
        if credential.status != status {
            self.store
                .set_credential_status(credential.organization_id, credential.id, status)
                .await?;
            tracing::info!(credential_id = %credential.id, status = %status, "credential status changed");
        }
        Ok(())
    }

    async fn run_test(
        &self,
        integration: &dyn Integration,
        secrets: &SecretMap,
        deadline: Duration,
    ) -> Result<TestConnectionResult, IntegrationError> {
        let service = integration.service_type();
        let outcome = match tokio::time::timeout(deadline, integration.test_connection(secrets)).await {
            Ok(result) => result,
            Err(_) => Err(IntegrationError::Timeout {
                service,
                timeout: deadline,
            }),
        };

        let label = match &outcome {
            Ok(r) if r.success => "success",
            Ok(_) => "failure",
            Err(e) => {
                tracing::warn!(service_type = %service, error = %e, "connectivity test did not complete");
                "error"
            }
        };
        self.metrics.credential_test(service.as_str(), label);
        outcome
    }
}

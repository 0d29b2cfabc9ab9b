use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::integrations::{ConfigValidationError, IntegrationError, RegistryError};
use crate::services::dispatch::DispatchError;
use crate::store::StoreError;
use crate::vault::VaultError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid configuration: {0}")]
    ConfigValidation(#[from] ConfigValidationError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} is still in use")]
    ConflictInUse(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unsupported service type: '{0}'")]
    UnsupportedServiceType(String),

    #[error("credential test failed: {0}")]
    CredentialTestFailed(String),

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("integration error: {0}")]
    Integration(#[from] IntegrationError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound("record".into()),
            StoreError::InUse(constraint) => AppError::ConflictInUse(constraint),
            StoreError::UniqueViolation(constraint) => AppError::Conflict(constraint),
            other => AppError::Store(other),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unsupported(tag) => AppError::UnsupportedServiceType(tag),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Validation(m) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_error",
                m.clone(),
            ),
            AppError::ConfigValidation(e) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_configuration",
                e.to_string(),
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                format!("{} not found", what),
            ),
            AppError::Conflict(m) => (
                StatusCode::CONFLICT,
                "conflict_error",
                "conflict",
                m.clone(),
            ),
            AppError::ConflictInUse(what) => (
                StatusCode::CONFLICT,
                "conflict_error",
                "in_use",
                format!("{} is still referenced and cannot be deleted", what),
            ),
            AppError::Unauthorized(m) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
                m.clone(),
            ),
            AppError::UnsupportedServiceType(tag) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "unsupported_service_type",
                format!("unsupported service type '{}'", tag),
            ),
            AppError::CredentialTestFailed(m) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request_error",
                "credential_test_failed",
                m.clone(),
            ),
            AppError::Vault(e) => {
                tracing::error!(error = %e, "vault error");
                let code = match e {
                    VaultError::AuthenticationFailed | VaultError::Malformed(_) => {
                        "credential_decryption_failed"
                    }
                    VaultError::Encryption | VaultError::InvalidKey(_) => "encryption_failed",
                };
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    code,
                    "stored credential could not be processed".to_string(),
                )
            }
            AppError::Integration(e) => {
                tracing::warn!(error = %e, "integration unreachable");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "integration_unreachable",
                    e.to_string(),
                )
            }
            AppError::Dispatch(e) => {
                tracing::warn!(error = %e, "dispatch failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "dispatch_failed",
                    e.to_string(),
                )
            }
            AppError::Store(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_category() {
        assert!(matches!(AppError::from(StoreError::NotFound), AppError::NotFound(_)));
        assert!(matches!(
            AppError::from(StoreError::InUse("fk".into())),
            AppError::ConflictInUse(_)
        ));
        assert!(matches!(
            AppError::from(StoreError::UniqueViolation("uq".into())),
            AppError::Conflict(_)
        ));
    }

    #[test]
    fn status_codes() {
        let cases = [
            (AppError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("credential".into()), StatusCode::NOT_FOUND),
            (AppError::ConflictInUse("credential".into()), StatusCode::CONFLICT),
            (AppError::CredentialTestFailed("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (AppError::UnsupportedServiceType("X".into()), StatusCode::BAD_REQUEST),
            (AppError::Vault(VaultError::AuthenticationFailed), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Unauthorized("no".into()), StatusCode::UNAUTHORIZED),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}

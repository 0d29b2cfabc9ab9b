use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::AppState;

/// Authenticated organization for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tenant(pub Uuid);

/// Claims of the bearer tokens issued by the account service.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub organization_id: Uuid,
    #[serde(default)]
    pub sub: Option<String>,
    pub exp: usize,
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::warn!(error = %e, "rejected bearer token");
            AppError::Unauthorized("invalid or expired token".into())
        })
}

/// Middleware: resolves the tenant from `Authorization: Bearer <jwt>`.
pub async fn tenant_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;

    let claims = verify_token(token, &state.config.jwt_secret)?;
    req.extensions_mut().insert(Tenant(claims.organization_id));
    Ok(next.run(req).await)
}

//! Authentication middleware
//!
//! Extracts and validates JWT tokens from requests.

use crate::auth::{decode_token, Claims, Role};
use crate::error::AuditError;
use crate::state::SharedState;
use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

/// Validate the bearer token and expose its claims to handlers
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuditError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AuditError::Unauthorized("Missing authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuditError::Unauthorized("Invalid authorization format".to_string()))?;

    let claims = decode_token(&state.jwt_secret, token)?;

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Require a role capable of the given action
pub fn require_role(claims: &Claims, required: Role) -> Result<(), AuditError> {
    let has_permission = match required {
        Role::Recorder => claims.role.can_record(),
        Role::Auditor => claims.role.can_view(),
        Role::Admin => claims.role.can_attach(),
    };

    if !has_permission {
        return Err(AuditError::Forbidden(format!(
            "Requires {} role, you have {}",
            required, claims.role
        )));
    }

    Ok(())
}

//! JWT token management
//!
//! Creation and validation of bearer tokens signed with the configured secret.

use crate::auth::Role;
use crate::error::AuditError;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Access token lifetime
pub const ACCESS_TOKEN_EXPIRATION_MINUTES: i64 = 15;

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject: the principal recorded as `audit_actor`
    pub sub: String,
    pub role: Role,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Sign a token for `subject`
pub fn create_token(secret: &str, subject: &str, role: Role) -> Result<String, AuditError> {
    if subject.trim().is_empty() {
        return Err(AuditError::Validation("Token subject must not be empty".to_string()));
    }

    let now = Utc::now();
    let claims = Claims {
        sub: subject.to_string(),
        role,
        exp: (now + Duration::minutes(ACCESS_TOKEN_EXPIRATION_MINUTES)).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuditError::Config(format!("Failed to create token: {}", e)))
}

/// Decode and validate a JWT token
pub fn decode_token(secret: &str, token: &str) -> Result<Claims, AuditError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AuditError::Unauthorized("Token expired".to_string())
        }
        jsonwebtoken::errors::ErrorKind::InvalidToken => {
            AuditError::Unauthorized("Invalid token".to_string())
        }
        _ => AuditError::Unauthorized(format!("Token validation failed: {}", e)),
    })?;

    if token_data.claims.sub.trim().is_empty() {
        return Err(AuditError::Unauthorized("Token has no subject".to_string()));
    }

    Ok(token_data.claims)
}

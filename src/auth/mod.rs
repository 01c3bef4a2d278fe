//! JWT bearer-token authentication and role-based access control.
//!
//! Implements zero-trust authentication for tactical operations: every
//! request carries a signed JWT naming the requesting principal's role
//! and classification clearance; `Claims` is an axum extractor so
//! handlers simply take it as an argument (NIST 800-53 IA-2).

use std::collections::HashSet;

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::types::Classification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Operator,
    Supervisor,
    Admin,
    Service,
}

impl Role {
    /// The closed set of permissions granted to this role. Mirrors the
    /// `ROLE_PERMISSIONS` table: each role is a fixed list, not a
    /// composable set of smaller grants.
    pub fn permissions(self) -> &'static [&'static str] {
        match self {
            Role::Operator => &["message:send", "message:read", "node:status"],
            Role::Supervisor => &[
                "message:send",
                "message:read",
                "message:delete",
                "node:status",
                "audit:read",
            ],
            Role::Admin => &[
                "message:send",
                "message:read",
                "message:delete",
                "node:status",
                "node:manage",
                "config:write",
                "audit:read",
                "audit:export",
            ],
            Role::Service => &["message:send", "message:read", "node:status", "internal:call"],
        }
    }
}

/// Raw JWT payload shape, deserialized directly by `jsonwebtoken`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawClaims {
    sub: String,
    exp: usize,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    classification_level: Option<Classification>,
    #[serde(default)]
    permissions: Option<Vec<String>>,
}

/// Validated principal for the current request.
#[derive(Debug, Clone)]
pub struct Claims {
    pub subject: String,
    pub node_id: String,
    pub role: Role,
    pub permissions: HashSet<String>,
    pub classification_level: Classification,
}

impl Claims {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn meets_classification(&self, required: Classification) -> bool {
        self.classification_level >= required
    }
}

/// Verifies an `Authorization: Bearer <token>` header and decodes its
/// claims. `secret` is the shared HS256 signing key.
pub fn verify_jwt(authorization: Option<&str>, secret: &str) -> Result<Claims, ApiError> {
    let header = authorization.ok_or(ApiError::Unauthorized)?;
    let mut parts = header.split_whitespace();
    let (scheme, token) = (parts.next(), parts.next());
    if parts.next().is_some() {
        return Err(ApiError::InvalidToken(
            "Invalid authorization header format. Use 'Bearer <token>'".into(),
        ));
    }
    let (scheme, token) = match (scheme, token) {
        (Some(scheme), Some(token)) => (scheme, token),
        _ => {
            return Err(ApiError::InvalidToken(
                "Invalid authorization header format. Use 'Bearer <token>'".into(),
            ))
        }
    };
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ApiError::InvalidToken(
            "Invalid authorization header format. Use 'Bearer <token>'".into(),
        ));
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub"]);
    validation.validate_aud = false;

    let decoded = jsonwebtoken::decode::<RawClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| ApiError::InvalidToken(format!("token validation failed: {e}")))?;

    let raw = decoded.claims;
    let role = raw.role.unwrap_or(Role::Operator);
    let permissions = match raw.permissions {
        Some(explicit) => explicit.into_iter().collect(),
        None => role.permissions().iter().map(|s| s.to_string()).collect(),
    };

    Ok(Claims {
        node_id: raw.node_id.unwrap_or_else(|| raw.sub.clone()),
        subject: raw.sub,
        role,
        permissions,
        classification_level: raw.classification_level.unwrap_or(Classification::Unclassified),
    })
}

/// Shared secret used to verify bearer tokens; installed into
/// `AppState` and reachable from the extractor via axum's state
/// injection.
#[derive(Debug, Clone)]
pub struct JwtSecret(pub String);

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
    JwtSecret: axum::extract::FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let secret = JwtSecret::from_ref(state);
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        verify_jwt(header, &secret.0)
    }
}

/// Returns `Err(ApiError::Forbidden)` unless `claims` grants `permission`.
pub fn require_permission(claims: &Claims, permission: &str) -> Result<(), ApiError> {
    if claims.has_permission(permission) {
        Ok(())
    } else {
        tracing::warn!(subject = %claims.subject, required = permission, "permission denied");
        Err(ApiError::Forbidden)
    }
}

/// Returns `Err(ApiError::Forbidden)` unless `claims`'s clearance meets
/// or exceeds `level`.
pub fn require_classification(claims: &Claims, level: Classification) -> Result<(), ApiError> {
    if claims.meets_classification(level) {
        Ok(())
    } else {
        tracing::warn!(subject = %claims.subject, required = %level, "classification insufficient");
        Err(ApiError::Forbidden)
    }
}

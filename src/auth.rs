//! API key authentication and caller identity
//!
//! Protected routes require `X-API-Key`. Task routes additionally take the
//! caller's user id from `X-User-Id` through the [`AuthUser`] extractor.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::errors::AppError;
use crate::validation;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying the authenticated caller's user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// API Key authentication errors
#[derive(Debug)]
pub enum AuthError {
    MissingApiKey,
    InvalidApiKey,
    NotConfigured,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingApiKey => (StatusCode::UNAUTHORIZED, "Missing X-API-Key header"),
            AuthError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "Invalid API key"),
            AuthError::NotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "API keys not configured. Set TASKFLOW_API_KEYS environment variable.",
            ),
        };

        (status, message).into_response()
    }
}

/// Accepted API keys, built once from configuration
#[derive(Debug, Clone)]
pub struct ApiKeys {
    keys: Arc<Vec<String>>,
}

impl ApiKeys {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }

    /// Validate a key using constant-time comparison against every configured key
    pub fn validate(&self, provided_key: &str) -> Result<(), AuthError> {
        if self.keys.is_empty() {
            return Err(AuthError::NotConfigured);
        }

        let mut found = false;
        for key in self.keys.iter() {
            // No early break: every key is compared
            if constant_time_compare(key, provided_key) {
                found = true;
            }
        }

        if found {
            Ok(())
        } else {
            Err(AuthError::InvalidApiKey)
        }
    }
}

/// Constant-time string comparison to prevent timing attacks
///
/// Leaks the length of the shorter string, which is acceptable for API keys.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let mut result = (a.len() ^ b.len()) as u8;

    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    for i in 0..a.len().min(b.len()) {
        result |= a_bytes[i] ^ b_bytes[i];
    }

    result == 0
}

/// Authentication middleware for protected routes
pub async fn auth_middleware(
    State(keys): State<ApiKeys>,
    request: Request,
    next: Next,
) -> Response {
    let api_key_value = match request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
    {
        Some(key) => key,
        None => return AuthError::MissingApiKey.into_response(),
    };

    if let Err(e) = keys.validate(&api_key_value) {
        tracing::debug!(path = %request.uri().path(), "Rejected request: {:?}", e);
        return e.into_response();
    }

    next.run(request).await
}

/// The authenticated caller's user id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| AppError::Unauthenticated("missing X-User-Id header".to_string()))?;

        validation::validate_user_id(&user_id)
            .map_err(|e| AppError::InvalidUserId(e.to_string()))?;

        Ok(AuthUser(user_id))
    }
}

/// Caller authentication for the HTTP transport
use crate::{
    context::AppContext,
    error::ModerationError,
    moderation::types::UserId,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

/// Authenticated caller resolved from the bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerContext {
    pub user_id: UserId,
}

#[async_trait]
impl FromRequestParts<AppContext> for CallerContext {
    type Rejection = ModerationError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| ModerationError::Authentication("Missing authorization header".to_string()))?;

        let user_id = verify_caller_token(&token, &state.config.authentication.jwt_secret)?;
        Ok(CallerContext { user_id })
    }
}

/// Optional caller - anonymous when no token is sent, rejected when the token is bad
#[derive(Debug, Clone, Copy)]
pub struct OptionalCaller {
    pub caller: Option<CallerContext>,
}

#[async_trait]
impl FromRequestParts<AppContext> for OptionalCaller {
    type Rejection = ModerationError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let caller = match extract_bearer_token(&parts.headers) {
            Some(token) => {
                let user_id = verify_caller_token(&token, &state.config.authentication.jwt_secret)?;
                Some(CallerContext { user_id })
            }
            None => None,
        };

        Ok(OptionalCaller { caller })
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Verify an HS256 caller token and return the numeric user id in `sub`
pub fn verify_caller_token(token: &str, jwt_secret: &str) -> Result<UserId, ModerationError> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    // Allow some clock skew (5 minutes)
    validation.leeway = 300;

    let token_data = decode::<serde_json::Value>(token, &decoding_key, &validation).map_err(|e| {
        tracing::warn!("JWT verification failed: {}", e);
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ModerationError::Authentication("Token has expired".to_string())
            }
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ModerationError::Authentication("Invalid token signature".to_string())
            }
            _ => ModerationError::Authentication(format!("Invalid token: {}", e)),
        }
    })?;

    // `sub` may be a JSON number or a numeric string
    let sub = token_data
        .claims
        .get("sub")
        .ok_or_else(|| ModerationError::Authentication("Invalid JWT: missing 'sub' claim".to_string()))?;
    let user_id = match sub {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse::<UserId>().ok(),
        _ => None,
    }
    .filter(|id| *id > 0)
    .ok_or_else(|| ModerationError::Authentication("Invalid JWT: 'sub' is not a user id".to_string()))?;

    Ok(user_id)
}

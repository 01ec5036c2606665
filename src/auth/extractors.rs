use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use super::{claims::Claims, jwt::JwtKeys};
use crate::error::ApiError;

/// Extracts and validates the bearer JWT, yielding its claims.
pub struct AuthUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        // "Bearer <token>" or "Token <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .or_else(|| auth.strip_prefix("Token "))
            .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header"))?;

        let claims = keys.verify(token.trim()).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            ApiError::unauthorized("Invalid or expired token")
        })?;

        Ok(AuthUser(claims))
    }
}

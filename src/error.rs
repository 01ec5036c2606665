use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::users::repo::StoreError;

pub const UNIQUE_MESSAGE: &str = "Username and email must be unique.";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Duplicate name/email or a field that failed validation.
    #[error("Input data validation failed")]
    Validation { errors: BTreeMap<String, String> },

    /// Reported as 401 to keep the status clients already handle.
    #[error("User not found")]
    UserNotFound,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), message.into());
        Self::Validation { errors }
    }

    pub fn not_unique() -> Self {
        Self::validation("username", UNIQUE_MESSAGE)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::UserNotFound | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(_) => Self::not_unique(),
            StoreError::NotFound => Self::UserNotFound,
            other => Self::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation { errors } => json!({
                "message": self.to_string(),
                "errors": errors,
            }),
            Self::UserNotFound => json!({ "errors": { "User": " not found" } }),
            Self::Unauthorized(msg) => json!({ "message": msg }),
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                json!({ "message": "Internal server error" })
            }
        };
        (status, Json(body)).into_response()
    }
}

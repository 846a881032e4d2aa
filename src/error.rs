use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::TransitionError;
use crate::keychain::KeychainError;
use crate::ports::RepositoryError;
use crate::providers::ProviderError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Method not allowed: provider '{provider}' has no webhook method '{method}'")]
    MethodNotAllowed { provider: String, method: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Repository error: {0}")]
    Repository(RepositoryError),

    #[error("Queue error: {0}")]
    Queue(String),
}

impl From<RepositoryError> for GatewayError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => GatewayError::NotFound(what),
            other => GatewayError::Repository(other),
        }
    }
}

impl From<KeychainError> for GatewayError {
    fn from(err: KeychainError) -> Self {
        GatewayError::Configuration(err.to_string())
    }
}

impl GatewayError {
    /// Whether a queued job failing with this error should be redelivered.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Provider(err) => err.is_transient(),
            GatewayError::NotFound(_) | GatewayError::Repository(_) | GatewayError::Queue(_) => {
                true
            }
            GatewayError::Configuration(_)
            | GatewayError::Validation(_)
            | GatewayError::MethodNotAllowed { .. }
            | GatewayError::InvalidTransition(_) => false,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Provider(err) if err.is_decline() => StatusCode::PAYMENT_REQUIRED,
            GatewayError::Provider(_) => StatusCode::BAD_GATEWAY,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidTransition(_) => StatusCode::CONFLICT,
            GatewayError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Invalid webhook: {0}")]
    InvalidWebhook(String),

    #[error("Payment provider error: {0}")]
    Checkout(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ResponseError for ServiceError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Conflict(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::InvalidWebhook(_) => StatusCode::BAD_REQUEST,
            ServiceError::Checkout(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ServiceError {
    fn error_type(&self) -> &str {
        match self {
            ServiceError::Validation(_) => "validation_error",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::InvalidWebhook(_) => "invalid_webhook",
            ServiceError::Checkout(_) => "external_service_error",
            ServiceError::Internal(_) => "internal_error",
        }
    }
}

impl From<booking_core::Error> for ServiceError {
    fn from(err: booking_core::Error) -> Self {
        use booking_core::Error as Core;
        match err {
            Core::Validation(msg) => ServiceError::Validation(msg),
            Core::Conflict(msg) => ServiceError::Conflict(msg),
            Core::DuplicateChannel(channel) => {
                ServiceError::Conflict(format!("Channel {} is already taken", channel))
            }
            Core::NotFound(what) => ServiceError::NotFound(format!("{} not found", what)),
            Core::Forbidden(msg) => ServiceError::Forbidden(msg),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<booking_engine::Error> for ServiceError {
    fn from(err: booking_engine::Error) -> Self {
        use booking_engine::Error as Engine;
        match err {
            Engine::Validation(msg) => ServiceError::Validation(msg),
            Engine::Conflict(msg) => ServiceError::Conflict(msg),
            Engine::NotFound(msg) => ServiceError::NotFound(msg),
            Engine::Forbidden(msg) => ServiceError::Forbidden(msg),
            Engine::Checkout(msg) => ServiceError::Checkout(msg),
            Engine::Store(core) => core.into(),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<settlement::Error> for ServiceError {
    fn from(err: settlement::Error) -> Self {
        use settlement::Error as Settlement;
        match err {
            Settlement::Store(core) => core.into(),
            Settlement::InvalidSignature(msg) => ServiceError::InvalidWebhook(msg),
            Settlement::InvalidPayload(msg) => ServiceError::InvalidWebhook(msg),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

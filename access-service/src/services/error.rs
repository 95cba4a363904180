use axum::http::StatusCode;
use service_core::error::AppError;
use thiserror::Error;

use super::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email address has not been verified")]
    EmailNotVerified,

    #[error("Email address is already verified")]
    AlreadyVerified,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Verification code has expired")]
    CodeExpired,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("Request has already been processed")]
    AlreadyProcessed,

    #[error("{0}")]
    ResourceNotFound(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Access grant has expired")]
    GrantExpired,

    #[error("{0}")]
    Forbidden(String),

    #[error("Unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::InvalidCredentials => "invalid_credentials",
            ServiceError::EmailNotVerified => "email_not_verified",
            ServiceError::AlreadyVerified => "already_verified",
            ServiceError::InvalidCode => "invalid_code",
            ServiceError::CodeExpired => "code_expired",
            ServiceError::InvalidOrExpiredToken => "invalid_or_expired_token",
            ServiceError::AlreadyProcessed => "already_processed",
            ServiceError::ResourceNotFound(_) => "resource_not_found",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::GrantExpired => "grant_expired",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::Unexpected(_) => "unexpected",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) | ServiceError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) | ServiceError::AlreadyProcessed => StatusCode::CONFLICT,
            ServiceError::InvalidCredentials | ServiceError::InvalidOrExpiredToken => {
                StatusCode::UNAUTHORIZED
            }
            ServiceError::EmailNotVerified | ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::AlreadyVerified
            | ServiceError::InvalidCode
            | ServiceError::CodeExpired
            | ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::GrantExpired => StatusCode::GONE,
            ServiceError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => ServiceError::Conflict("Email is already registered".to_string()),
            StoreError::Backend(e) => ServiceError::Unexpected(e),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unexpected(e) => AppError::InternalError(e),
            other => AppError::domain(other.status(), other.kind(), other.to_string()),
        }
    }
}

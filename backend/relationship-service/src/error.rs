/// Error types for relationship-service
use thiserror::Error;

use crate::repository::RepositoryError;
use crate::services::assets::AssetError;
use crate::services::email::MailError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("User {0} cannot follow themselves")]
    SelfReference(uuid::Uuid),

    #[error("Version conflict: {0}")]
    Conflict(String),

    #[error("External service failure: {0}")]
    ExternalService(String),

    #[error("Password reset token is invalid or has expired")]
    InvalidOrExpiredToken,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Only optimistic version conflicts are worth retrying with a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound(_))
    }

    /// Stable identifier for request layers and metric labels
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::SelfReference(_) => "SELF_REFERENCE",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::ExternalService(_) => "EXTERNAL_SERVICE_FAILURE",
            ServiceError::InvalidOrExpiredToken => "INVALID_OR_EXPIRED_TOKEN",
            ServiceError::Validation(_) => "VALIDATION",
            ServiceError::AlreadyExists(_) => "ALREADY_EXISTS",
            ServiceError::InvalidCredentials => "INVALID_CREDENTIALS",
            ServiceError::Timeout(_) => "TIMEOUT",
            ServiceError::Database(_) => "DATABASE",
            ServiceError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ServiceError::NotFound(what),
            RepositoryError::Conflict(what) => ServiceError::Conflict(what),
            RepositoryError::Duplicate(what) => ServiceError::AlreadyExists(what),
            RepositoryError::Backend(msg) => {
                tracing::error!("Repository backend error: {}", msg);
                ServiceError::Database(msg)
            }
        }
    }
}

impl From<AssetError> for ServiceError {
    fn from(err: AssetError) -> Self {
        ServiceError::ExternalService(err.to_string())
    }
}

impl From<MailError> for ServiceError {
    fn from(err: MailError) -> Self {
        ServiceError::ExternalService(err.to_string())
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

use sigpool_core::{CoreError, ErrorResponse};
use thiserror::Error;

/// Control plane specific errors
#[derive(Debug, Clone, Error)]
pub enum ControlPlaneError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Matchmaker error: {0}")]
    Matchmaker(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Queue error: {0}")]
    Queue(String),
    #[error("Compute error: {0}")]
    Compute(String),
    #[error("Notification error: {0}")]
    Notification(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Slot not found: {0}")]
    SlotNotFound(String),
    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl ControlPlaneError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ControlPlaneError::InvalidRequest(_) => "INVALID_REQUEST",
            ControlPlaneError::Config(_) => "CONFIG_ERROR",
            ControlPlaneError::Matchmaker(_) => "MATCHMAKER_ERROR",
            ControlPlaneError::Timeout(_) => "TIMEOUT",
            ControlPlaneError::Queue(_) => "QUEUE_ERROR",
            ControlPlaneError::Compute(_) => "COMPUTE_ERROR",
            ControlPlaneError::Notification(_) => "NOTIFICATION_ERROR",
            ControlPlaneError::StorageError(_) => "STORAGE_ERROR",
            ControlPlaneError::Serialization(_) => "SERIALIZATION_ERROR",
            ControlPlaneError::SlotNotFound(_) => "SLOT_NOT_FOUND",
            ControlPlaneError::Metrics(_) => "METRICS_ERROR",
        }
    }

    /// Status reported at the invocation boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            ControlPlaneError::InvalidRequest(_) | ControlPlaneError::Serialization(_) => 400,
            ControlPlaneError::SlotNotFound(_) => 404,
            ControlPlaneError::Matchmaker(_) => 502,
            ControlPlaneError::Timeout(_) => 504,
            _ => 500,
        }
    }

    fn message(&self) -> String {
        match self {
            ControlPlaneError::InvalidRequest(msg)
            | ControlPlaneError::Config(msg)
            | ControlPlaneError::Matchmaker(msg)
            | ControlPlaneError::Timeout(msg)
            | ControlPlaneError::Queue(msg)
            | ControlPlaneError::Compute(msg)
            | ControlPlaneError::Notification(msg)
            | ControlPlaneError::StorageError(msg)
            | ControlPlaneError::Serialization(msg)
            | ControlPlaneError::SlotNotFound(msg)
            | ControlPlaneError::Metrics(msg) => msg.clone(),
        }
    }
}

impl From<CoreError> for ControlPlaneError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidRequest(msg) => ControlPlaneError::InvalidRequest(msg),
            CoreError::SerializationError(msg) => ControlPlaneError::Serialization(msg),
            CoreError::MatchmakerError(msg) => ControlPlaneError::Matchmaker(msg),
            CoreError::Timeout(msg) => ControlPlaneError::Timeout(msg),
            CoreError::QueueError(msg) => ControlPlaneError::Queue(msg),
            CoreError::ComputeError(msg) => ControlPlaneError::Compute(msg),
            CoreError::NotificationError(msg) => ControlPlaneError::Notification(msg),
            CoreError::StorageError(msg) => ControlPlaneError::StorageError(msg),
        }
    }
}

impl From<ControlPlaneError> for ErrorResponse {
    fn from(err: ControlPlaneError) -> Self {
        ErrorResponse::new(err.error_code(), err.message())
    }
}

pub type ControlPlaneResult<T> = std::result::Result<T, ControlPlaneError>;

pub mod bootstrap;
pub mod pool;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub use bootstrap::{BootstrapTemplate, LaunchTemplateRef, DEFAULT_PLACEHOLDER};
pub use pool::PoolState;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Matchmaker error: {0}")]
    MatchmakerError(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Queue error: {0}")]
    QueueError(String),
    #[error("Compute error: {0}")]
    ComputeError(String),
    #[error("Notification error: {0}")]
    NotificationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// A normalized session request as placed on the queue by the intake service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub request_id: String,
    pub connection_id: String,
    pub body: Value,
}

impl SessionRequest {
    pub fn new(
        request_id: impl Into<String>,
        connection_id: impl Into<String>,
        body: Value,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            connection_id: connection_id.into(),
            body,
        }
    }

    /// Parse a raw queue message body.
    pub fn from_message_body(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            CoreError::SerializationError(format!("malformed session request: {e}"))
        })
    }

    /// The payload forwarded downstream once a worker is matched: the request
    /// itself with every matchmaker field inserted at the top level.
    pub fn merged_with(&self, details: &Map<String, Value>) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "requestId".to_string(),
            Value::String(self.request_id.clone()),
        );
        payload.insert(
            "connectionId".to_string(),
            Value::String(self.connection_id.clone()),
        );
        payload.insert("body".to_string(), self.body.clone());

        for (key, value) in details {
            payload.insert(key.clone(), value.clone());
        }

        Value::Object(payload)
    }
}

/// One logical routing destination awaiting a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacitySlot {
    pub slot_key: String,
    pub routing_ref: String,
    #[serde(default)]
    pub instance_id: String,
    pub match_key: String,
}

impl CapacitySlot {
    pub fn new(
        slot_key: impl Into<String>,
        routing_ref: impl Into<String>,
        match_key: impl Into<String>,
    ) -> Self {
        Self {
            slot_key: slot_key.into(),
            routing_ref: routing_ref.into(),
            instance_id: String::new(),
            match_key: match_key.into(),
        }
    }

    pub fn is_unassigned(&self) -> bool {
        self.instance_id.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Running,
    Ready,
    Stopping,
    Stopped,
    Terminated,
    Unknown,
}

impl LifecycleState {
    /// Whether an instance in this state counts towards the pool size.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            LifecycleState::Pending | LifecycleState::Running | LifecycleState::Ready
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Running => "running",
            LifecycleState::Ready => "ready",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Terminated => "terminated",
            LifecycleState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInstance {
    pub instance_id: String,
    pub private_address: Option<String>,
    pub public_address: Option<String>,
    pub lifecycle_state: LifecycleState,
}

impl WorkerInstance {
    pub fn pending(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            private_address: None,
            public_address: None,
            lifecycle_state: LifecycleState::Pending,
        }
    }
}

/// A worker created by the provisioner, with the slot it was bound to (if any).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedInstance {
    #[serde(flatten)]
    pub instance: WorkerInstance,
    pub bound_slot: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisionMode {
    BulkFill,
    OnDemand,
}

impl fmt::Display for ProvisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionMode::BulkFill => f.write_str("BulkFill"),
            ProvisionMode::OnDemand => f.write_str("OnDemand"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    Created { instance: ProvisionedInstance },
    BulkCreated { instances: Vec<ProvisionedInstance> },
    CapacityExceeded { live: usize, limit: u32 },
    LaunchFailed { reason: String },
}

impl ProvisionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProvisionOutcome::Created { .. } => "created",
            ProvisionOutcome::BulkCreated { .. } => "bulk_created",
            ProvisionOutcome::CapacityExceeded { .. } => "capacity_exceeded",
            ProvisionOutcome::LaunchFailed { .. } => "launch_failed",
        }
    }

    pub fn launched_count(&self) -> usize {
        match self {
            ProvisionOutcome::Created { .. } => 1,
            ProvisionOutcome::BulkCreated { instances } => instances.len(),
            _ => 0,
        }
    }
}

/// Result of asking the matchmaker for a ready worker.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Available(Map<String, Value>),
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    pub details: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Structured status reported at an invocation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub status_code: u16,
    pub body: Value,
}

impl InvocationResponse {
    pub fn ok(body: impl Serialize) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status_code: u16, body: impl Serialize) -> Self {
        let body = serde_json::to_value(body)
            .unwrap_or_else(|e| Value::String(format!("unserializable response body: {e}")));
        Self { status_code, body }
    }

    pub fn error(status_code: u16, error: ErrorResponse) -> Self {
        Self::with_status(status_code, error)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

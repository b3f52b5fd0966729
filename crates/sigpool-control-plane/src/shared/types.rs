use serde::{Deserialize, Serialize};

pub use sigpool_core::{
    CapacitySlot, InvocationResponse, ProvisionMode, ProvisionOutcome, ProvisionedInstance,
    SessionRequest, WorkerInstance,
};

/// Provisioner invocation payload: `{"mode": "BulkFill" | "OnDemand"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub mode: ProvisionMode,
}

impl ProvisionRequest {
    pub fn on_demand() -> Self {
        Self {
            mode: ProvisionMode::OnDemand,
        }
    }

    pub fn bulk_fill() -> Self {
        Self {
            mode: ProvisionMode::BulkFill,
        }
    }
}

/// Result of an administrative capacity table seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub added: usize,
    pub skipped: usize,
}

/// Response to a local queue enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub message_id: String,
    pub request_id: String,
}

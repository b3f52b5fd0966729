use crate::features::observability::controller::ObservabilityController;
use crate::features::provisioning::service::InstanceProvisioner;
use crate::shared::error::ControlPlaneResult;
use crate::shared::types::{InvocationResponse, ProvisionMode, ProvisionOutcome, ProvisionRequest};
use async_trait::async_trait;
use sigpool_core::ErrorResponse;
use std::sync::Arc;
use tracing::{info, warn};

/// Invocation wrapper around the provisioner
pub struct ProvisionController {
    provisioner: Arc<InstanceProvisioner>,
    observability: Arc<ObservabilityController>,
}

impl ProvisionController {
    pub fn new(
        provisioner: Arc<InstanceProvisioner>,
        observability: Arc<ObservabilityController>,
    ) -> Self {
        Self {
            provisioner,
            observability,
        }
    }

    /// Run one provisioning pass and report the outcome as a structured status.
    pub async fn invoke(&self, request: ProvisionRequest) -> InvocationResponse {
        info!(mode = %request.mode, "Received provision request");

        let outcome = self.provisioner.provision(request.mode).await;
        self.observability
            .record_provision(request.mode, outcome.label());

        match self.provisioner.live_count().await {
            Ok(live) => self.observability.set_live_instances(live),
            Err(err) => warn!(error = %err, "Failed to refresh live instance count"),
        }

        match &outcome {
            ProvisionOutcome::Created { .. } | ProvisionOutcome::BulkCreated { .. } => {
                InvocationResponse::ok(&outcome)
            }
            ProvisionOutcome::CapacityExceeded { .. } => {
                InvocationResponse::with_status(409, &outcome)
            }
            ProvisionOutcome::LaunchFailed { reason } => InvocationResponse::error(
                500,
                ErrorResponse::new("LAUNCH_FAILED", reason.clone()),
            ),
        }
    }
}

/// How the dispatch loop asks for more capacity.
#[async_trait]
pub trait ProvisionTrigger: Send + Sync {
    /// Request a provisioning pass. Returns once the request is handed off,
    /// not when the pass completes.
    async fn trigger(&self, mode: ProvisionMode) -> ControlPlaneResult<()>;
}

/// Runs each requested pass on its own tokio task.
pub struct SpawningProvisionTrigger {
    controller: Arc<ProvisionController>,
}

impl SpawningProvisionTrigger {
    pub fn new(controller: Arc<ProvisionController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl ProvisionTrigger for SpawningProvisionTrigger {
    async fn trigger(&self, mode: ProvisionMode) -> ControlPlaneResult<()> {
        let controller = self.controller.clone();
        tokio::spawn(async move {
            let response = controller.invoke(ProvisionRequest { mode }).await;
            if response.is_success() {
                info!(%mode, status = response.status_code, "Triggered provisioning finished");
            } else {
                warn!(%mode, status = response.status_code, body = %response.body, "Triggered provisioning did not launch");
            }
        });
        Ok(())
    }
}

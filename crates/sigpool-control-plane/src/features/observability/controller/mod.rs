use crate::features::observability::repo::ObservabilityRepository;
use crate::features::observability::service::ObservabilityService;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use sigpool_core::ProvisionMode;
use std::sync::Arc;

/// Metrics sink shared by every feature. One instance per process, passed in
/// explicitly; tests build their own.
pub struct ObservabilityController {
    service: ObservabilityService,
}

impl ObservabilityController {
    pub fn new(service: ObservabilityService) -> Self {
        Self { service }
    }

    /// Controller backed by a fresh prometheus registry.
    pub fn with_registry() -> ControlPlaneResult<Arc<Self>> {
        let repo = Arc::new(ObservabilityRepository::new().map_err(ControlPlaneError::Metrics)?);
        Ok(Arc::new(Self::new(ObservabilityService::new(repo))))
    }

    pub fn record_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.service.record_api_request(endpoint, status, seconds);
    }

    pub fn record_received(&self, count: usize) {
        self.service.record_received(count);
    }

    pub fn record_disposition(&self, disposition: &str) {
        self.service.record_disposition(disposition);
    }

    pub fn record_dispatch_failure(&self, error_code: &str) {
        self.service.record_dispatch_failure(error_code);
    }

    pub fn record_provision(&self, mode: ProvisionMode, outcome: &str) {
        self.service.record_provision(mode, outcome);
    }

    pub fn set_live_instances(&self, count: usize) {
        self.service.set_live_instances(count);
    }

    pub fn record_matchmaker_latency(&self, seconds: f64) {
        self.service.record_matchmaker_latency(seconds);
    }

    pub fn render_metrics(&self) -> ControlPlaneResult<String> {
        self.service
            .render_metrics()
            .map_err(ControlPlaneError::Metrics)
    }
}

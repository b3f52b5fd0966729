use crate::features::observability::repo::ObservabilityRepository;
use sigpool_core::ProvisionMode;
use std::sync::Arc;

pub struct ObservabilityService {
    repo: Arc<ObservabilityRepository>,
}

impl ObservabilityService {
    pub fn new(repo: Arc<ObservabilityRepository>) -> Self {
        Self { repo }
    }

    pub fn record_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.repo.observe_api_request(endpoint, status, seconds);
    }

    pub fn record_received(&self, count: usize) {
        self.repo.inc_messages_received(count);
    }

    pub fn record_disposition(&self, disposition: &str) {
        self.repo.inc_dispatch_disposition(disposition);
    }

    pub fn record_dispatch_failure(&self, error_code: &str) {
        self.repo.inc_dispatch_failure(error_code);
    }

    pub fn record_provision(&self, mode: ProvisionMode, outcome: &str) {
        self.repo.inc_provision_outcome(&mode.to_string(), outcome);
    }

    pub fn set_live_instances(&self, count: usize) {
        self.repo.set_live_instance_count(count as f64);
    }

    pub fn record_matchmaker_latency(&self, seconds: f64) {
        self.repo.observe_matchmaker_latency(seconds);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.repo.render_metrics()
    }
}

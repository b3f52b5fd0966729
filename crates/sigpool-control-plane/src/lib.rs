pub mod api;
pub mod features;
pub mod shared;

use std::sync::Arc;

use axum::Router;
use sigpool_core::BootstrapTemplate;
use sigpool_providers::{ComputeRepository, MatchmakerService, NotifierService, SessionQueueRepository};

use crate::api::ApiState;
use crate::features::capacity_table::repo::CapacityTableRepository;
use crate::features::capacity_table::service::CapacityTableService;
use crate::features::dispatch::controller::DispatchController;
use crate::features::dispatch::service::DispatchLoop;
use crate::features::observability::controller::ObservabilityController;
use crate::features::provisioning::controller::{ProvisionController, SpawningProvisionTrigger};
use crate::features::provisioning::service::{InstanceProvisioner, ProvisionerSettings};
use crate::shared::config::ControlPlaneConfig;
use crate::shared::error::ControlPlaneResult;

/// External services the control plane is wired to, built once per process.
pub struct Collaborators {
    pub queue: Arc<dyn SessionQueueRepository>,
    pub matchmaker: Arc<MatchmakerService>,
    pub notifier: Arc<NotifierService>,
    pub compute: Arc<dyn ComputeRepository>,
    pub slots: Arc<dyn CapacityTableRepository>,
}

/// Fully wired control plane: dispatch loop, provisioner and capacity table.
pub struct ControlPlane {
    pub capacity: Arc<CapacityTableService>,
    pub provision: Arc<ProvisionController>,
    pub dispatch: Arc<DispatchController>,
    pub queue: Arc<dyn SessionQueueRepository>,
    pub observability: Arc<ObservabilityController>,
}

impl ControlPlane {
    pub fn assemble(
        config: &ControlPlaneConfig,
        bootstrap: BootstrapTemplate,
        collaborators: Collaborators,
    ) -> ControlPlaneResult<Self> {
        let observability = ObservabilityController::with_registry()?;
        let capacity = Arc::new(CapacityTableService::new(collaborators.slots));

        let settings = ProvisionerSettings {
            concurrency_limit: config.concurrency_limit,
            placement_candidates: config.placement_candidates.clone(),
            launch_template: config.launch_template.clone(),
            bootstrap,
            matchmaker_address: config.matchmaker_address.clone(),
            application_tag: config.application_tag.clone(),
            instance_name: config.instance_name.clone(),
            readiness: config.readiness,
            binding_mode: config.binding_mode,
        };
        let provisioner = Arc::new(InstanceProvisioner::new(
            collaborators.compute,
            capacity.clone(),
            settings,
        )?);
        let provision = Arc::new(ProvisionController::new(
            provisioner,
            observability.clone(),
        ));

        let dispatch_loop = Arc::new(DispatchLoop::new(
            collaborators.queue.clone(),
            collaborators.matchmaker,
            collaborators.notifier,
            Arc::new(SpawningProvisionTrigger::new(provision.clone())),
            observability.clone(),
            config.dispatch,
        ));
        let dispatch = Arc::new(DispatchController::new(
            dispatch_loop,
            observability.clone(),
            config.dispatch_interval,
        ));

        Ok(Self {
            capacity,
            provision,
            dispatch,
            queue: collaborators.queue,
            observability,
        })
    }

    pub fn router(&self) -> Router {
        api::router(ApiState {
            dispatch: self.dispatch.clone(),
            provision: self.provision.clone(),
            queue: self.queue.clone(),
            capacity: self.capacity.clone(),
            observability: self.observability.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::capacity_table::repo::InMemoryCapacityTableRepository;
    use crate::features::dispatch::service::tests::{reply, ScriptedMatchmaker};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use sigpool_core::{CapacitySlot, Result as CoreResult};
    use sigpool_providers::features::matchmaker::repo::MatchmakerResponse;
    use sigpool_providers::{
        InMemoryNotifierRepository, InMemorySessionQueue, NotificationTarget,
        SimulatedComputeRepository,
    };
    use std::collections::HashMap;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestPlane {
        plane: ControlPlane,
        queue: InMemorySessionQueue,
        notifier: InMemoryNotifierRepository,
        compute: SimulatedComputeRepository,
    }

    fn test_config(extra: &[(&str, &str)]) -> ControlPlaneConfig {
        let mut env: HashMap<String, String> = HashMap::from([
            ("MATCHMAKER_URL".to_string(), "http://matchmaker/signallingserver".to_string()),
            ("MATCHMAKER_ADDRESS".to_string(), "10.9.9.9".to_string()),
            ("CONCURRENCY_LIMIT".to_string(), "2".to_string()),
            ("QUEUE_WAIT_SECS".to_string(), "0".to_string()),
        ]);
        for (key, value) in extra {
            env.insert(key.to_string(), value.to_string());
        }
        ControlPlaneConfig::from_lookup(|key| env.get(key).cloned()).unwrap()
    }

    fn test_plane(
        replies: Vec<CoreResult<MatchmakerResponse>>,
        compute: SimulatedComputeRepository,
    ) -> TestPlane {
        let config = test_config(&[]);
        let queue = InMemorySessionQueue::new(config.queue_visibility_timeout);
        let notifier = InMemoryNotifierRepository::new();
        let plane = ControlPlane::assemble(
            &config,
            BootstrapTemplate::default(),
            Collaborators {
                queue: Arc::new(queue.clone()),
                matchmaker: Arc::new(MatchmakerService::new(
                    Arc::new(ScriptedMatchmaker::new(replies)),
                    config.matchmaker_url.clone(),
                    "secret",
                )),
                notifier: Arc::new(NotifierService::new(Arc::new(notifier.clone()))),
                compute: Arc::new(compute.clone()),
                slots: Arc::new(InMemoryCapacityTableRepository::new()),
            },
        )
        .unwrap();
        TestPlane {
            plane,
            queue,
            notifier,
            compute,
        }
    }

    async fn call(router: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn json_body(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_request_provisions_and_is_matched_later() {
        let t = test_plane(
            vec![reply(400, "no servers"), reply(200, r#"{"server":"10.0.0.5"}"#)],
            SimulatedComputeRepository::new(Some(1)),
        );
        t.plane
            .capacity
            .seed(vec![CapacitySlot::new("s1", "rule-1", "/s1")], false)
            .await
            .unwrap();

        let (status, _) = call(
            t.plane.router(),
            "POST",
            "/v1/queue",
            Some(json!({"requestId": "r1", "connectionId": "c1", "body": {"room": "a"}})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = call(t.plane.router(), "POST", "/v1/dispatch", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["handled"][0]["disposition"], "provision_triggered");
        assert_eq!(t.queue.len().await, 1);

        // Let the spawned on-demand pass launch, become addressable and bind.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(t.compute.launches().await.len(), 1);
        let slots = t.plane.capacity.list_slots().await.unwrap();
        assert!(!slots[0].is_unassigned());

        tokio::time::advance(Duration::from_secs(30)).await;
        let (status, body) = call(t.plane.router(), "POST", "/v1/dispatch", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["handled"][0]["disposition"], "matched");
        assert_eq!(t.queue.len().await, 0);
        assert_eq!(
            t.notifier.delivered_to(NotificationTarget::SessionDetails),
            vec![json!({
                "requestId": "r1",
                "connectionId": "c1",
                "body": {"room": "a"},
                "server": "10.0.0.5"
            })]
        );
    }

    #[tokio::test]
    async fn test_provision_endpoint_reports_capacity_exceeded() {
        let compute = SimulatedComputeRepository::new(Some(0));
        let t = test_plane(vec![], compute);

        for expected in [StatusCode::OK, StatusCode::OK, StatusCode::CONFLICT] {
            let (status, _) = call(
                t.plane.router(),
                "POST",
                "/v1/provision",
                Some(json!({"mode": "OnDemand"})),
            )
            .await;
            assert_eq!(status, expected);
        }
        assert_eq!(t.compute.launches().await.len(), 2);
    }

    #[tokio::test]
    async fn test_provision_endpoint_rejects_unknown_mode() {
        let t = test_plane(vec![], SimulatedComputeRepository::default());

        let (status, _) = call(
            t.plane.router(),
            "POST",
            "/v1/provision",
            Some(json!({"mode": "Sometimes"})),
        )
        .await;

        assert!(status.is_client_error());
        assert!(t.compute.launches().await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_endpoint_surfaces_matchmaker_failure() {
        let t = test_plane(vec![reply(503, "unavailable")], SimulatedComputeRepository::default());
        t.queue
            .send(json!({"requestId": "r1", "connectionId": "c1", "body": {}}).to_string())
            .await
            .unwrap();

        let (status, body) = call(t.plane.router(), "POST", "/v1/dispatch", None).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json_body(&body)["error_code"], "MATCHMAKER_ERROR");
        assert_eq!(t.queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_queue_endpoint_rejects_incomplete_request() {
        let t = test_plane(vec![], SimulatedComputeRepository::default());

        let (status, _) = call(
            t.plane.router(),
            "POST",
            "/v1/queue",
            Some(json!({"requestId": "r1"})),
        )
        .await;

        assert!(status.is_client_error());
        assert_eq!(t.queue.len().await, 0);
    }

    #[tokio::test]
    async fn test_slots_health_and_metrics_endpoints() {
        let t = test_plane(vec![], SimulatedComputeRepository::default());
        t.plane
            .capacity
            .seed(vec![CapacitySlot::new("s1", "rule-1", "/s1")], false)
            .await
            .unwrap();

        let (status, body) = call(t.plane.router(), "GET", "/v1/slots", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)[0]["slotKey"], "s1");
        assert_eq!(json_body(&body)[0]["instanceId"], "");

        let (status, body) = call(t.plane.router(), "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["status"], "ok");

        let (status, body) = call(t.plane.router(), "GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("sigpool_api_request_total"));
        assert!(text.contains("endpoint=\"slots\""));
    }
}

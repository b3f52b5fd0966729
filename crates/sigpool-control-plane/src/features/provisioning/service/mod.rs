use crate::features::capacity_table::service::{BindingMode, CapacityTableService};
use crate::features::provisioning::readiness::{wait_for_address, ReadinessPolicy};
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sigpool_core::{
    BootstrapTemplate, LaunchTemplateRef, PoolState, ProvisionMode, ProvisionOutcome,
    ProvisionedInstance, WorkerInstance,
};
use sigpool_providers::{ComputeRepository, LaunchRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub const APPLICATION_TAG_KEY: &str = "Application";
pub const INSTANCE_TYPE: &str = "signalling";
pub const CREATED_BY: &str = "sigpool-provisioner";

/// Fixed inputs to every provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    pub concurrency_limit: u32,
    pub placement_candidates: Vec<String>,
    pub launch_template: LaunchTemplateRef,
    pub bootstrap: BootstrapTemplate,
    /// Substituted for the bootstrap placeholder.
    pub matchmaker_address: String,
    pub application_tag: String,
    pub instance_name: String,
    pub readiness: ReadinessPolicy,
    pub binding_mode: BindingMode,
}

/// Gates and executes pool growth, then binds new workers to free slots.
pub struct InstanceProvisioner {
    compute: Arc<dyn ComputeRepository>,
    capacity: Arc<CapacityTableService>,
    settings: ProvisionerSettings,
    rng: Mutex<StdRng>,
}

impl InstanceProvisioner {
    pub fn new(
        compute: Arc<dyn ComputeRepository>,
        capacity: Arc<CapacityTableService>,
        settings: ProvisionerSettings,
    ) -> ControlPlaneResult<Self> {
        Self::with_rng(compute, capacity, settings, StdRng::from_entropy())
    }

    /// Same as `new` with a caller-supplied placement source.
    pub fn with_rng(
        compute: Arc<dyn ComputeRepository>,
        capacity: Arc<CapacityTableService>,
        settings: ProvisionerSettings,
        rng: StdRng,
    ) -> ControlPlaneResult<Self> {
        if settings.concurrency_limit == 0 {
            return Err(ControlPlaneError::Config(
                "concurrency limit must be greater than zero".to_string(),
            ));
        }
        if !settings.bootstrap.contains_placeholder() {
            warn!(
                placeholder = %settings.bootstrap.placeholder(),
                "Bootstrap template has no placeholder, matchmaker address will not be embedded"
            );
        }

        Ok(Self {
            compute,
            capacity,
            settings,
            rng: Mutex::new(rng),
        })
    }

    pub fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    /// Live instances carrying this application's tag.
    pub async fn live_count(&self) -> ControlPlaneResult<usize> {
        Ok(self
            .compute
            .count_live(APPLICATION_TAG_KEY, &self.settings.application_tag)
            .await?)
    }

    pub async fn provision(&self, mode: ProvisionMode) -> ProvisionOutcome {
        match mode {
            ProvisionMode::BulkFill => self.bulk_fill().await,
            ProvisionMode::OnDemand => self.on_demand().await,
        }
    }

    /// Launch `concurrency_limit` instances without looking at the current
    /// pool. Running it while instances exist overshoots the limit.
    async fn bulk_fill(&self) -> ProvisionOutcome {
        let limit = self.settings.concurrency_limit;
        info!(limit, "Bulk filling signalling pool");

        let mut instances = Vec::with_capacity(limit as usize);
        for attempt in 1..=limit {
            match self.launch_one().await {
                Ok(instance_id) => instances.push(ProvisionedInstance {
                    instance: WorkerInstance::pending(instance_id),
                    bound_slot: None,
                }),
                Err(err) => {
                    error!(attempt, launched = instances.len(), error = %err, "Bulk fill launch failed");
                    return ProvisionOutcome::LaunchFailed {
                        reason: format!(
                            "launch {attempt} of {limit} failed after {} succeeded: {err}",
                            instances.len()
                        ),
                    };
                }
            }
        }

        info!(launched = instances.len(), "Bulk fill complete");
        ProvisionOutcome::BulkCreated { instances }
    }

    async fn on_demand(&self) -> ProvisionOutcome {
        let limit = self.settings.concurrency_limit;
        let live = match self.live_count().await {
            Ok(live) => live,
            Err(err) => {
                error!(error = %err, "Failed to count live instances");
                return ProvisionOutcome::LaunchFailed {
                    reason: format!("failed to count live instances: {err}"),
                };
            }
        };

        let pool = PoolState::new(live, limit);
        if !pool.allows_growth() {
            info!(live, limit, "Pool at capacity, not launching");
            return ProvisionOutcome::CapacityExceeded { live, limit };
        }

        let instance_id = match self.launch_one().await {
            Ok(id) => id,
            Err(err) => {
                error!(error = %err, "On-demand launch failed");
                return ProvisionOutcome::LaunchFailed {
                    reason: err.to_string(),
                };
            }
        };

        let instance = match wait_for_address(
            self.compute.as_ref(),
            &instance_id,
            &self.settings.readiness,
        )
        .await
        {
            Ok(instance) => instance,
            Err(err) => {
                error!(%instance_id, error = %err, "Failed to describe launched instance");
                return ProvisionOutcome::LaunchFailed {
                    reason: format!("instance {instance_id} launched but describe failed: {err}"),
                };
            }
        };

        let bound_slot = match self
            .capacity
            .bind_free_slot(&instance_id, self.settings.binding_mode)
            .await
        {
            Ok(slot) => slot,
            Err(err) => {
                warn!(%instance_id, error = %err, "Failed to bind instance to a capacity slot");
                None
            }
        };

        ProvisionOutcome::Created {
            instance: ProvisionedInstance {
                instance,
                bound_slot,
            },
        }
    }

    async fn launch_one(&self) -> ControlPlaneResult<String> {
        let placement = self.choose_placement().await;
        let request = LaunchRequest {
            template: self.settings.launch_template.clone(),
            count: 1,
            tags: self.launch_tags(),
            bootstrap_payload: self
                .settings
                .bootstrap
                .encode(&self.settings.matchmaker_address),
            placement: placement.clone(),
        };

        let instance_id = self
            .compute
            .launch(request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ControlPlaneError::Compute("launch returned no instance id".to_string())
            })?;

        info!(%instance_id, placement = ?placement, "Launched signalling instance");
        Ok(instance_id)
    }

    async fn choose_placement(&self) -> Option<String> {
        let candidates = &self.settings.placement_candidates;
        if candidates.is_empty() {
            return None;
        }
        let mut rng = self.rng.lock().await;
        candidates.choose(&mut *rng).cloned()
    }

    fn launch_tags(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Name".to_string(), self.settings.instance_name.clone()),
            ("Type".to_string(), INSTANCE_TYPE.to_string()),
            (
                APPLICATION_TAG_KEY.to_string(),
                self.settings.application_tag.clone(),
            ),
            ("CreatedBy".to_string(), CREATED_BY.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::capacity_table::repo::{
        CapacityTableRepository, InMemoryCapacityTableRepository,
    };
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use proptest::prelude::*;
    use sigpool_core::{CapacitySlot, LifecycleState};
    use sigpool_providers::SimulatedComputeRepository;
    use std::time::Duration;

    fn settings(limit: u32, candidates: &[&str]) -> ProvisionerSettings {
        ProvisionerSettings {
            concurrency_limit: limit,
            placement_candidates: candidates.iter().map(|c| c.to_string()).collect(),
            launch_template: LaunchTemplateRef::parse("lt-0abc").unwrap(),
            bootstrap: BootstrapTemplate::new("mm=%MATCHMAKER_IP%", "%MATCHMAKER_IP%").unwrap(),
            matchmaker_address: "10.1.2.3".to_string(),
            application_tag: "sigpool-test".to_string(),
            instance_name: "signalling-server".to_string(),
            readiness: ReadinessPolicy::new(Duration::from_secs(2), Duration::from_secs(6))
                .unwrap(),
            binding_mode: BindingMode::Unconditional,
        }
    }

    struct Fixture {
        compute: Arc<SimulatedComputeRepository>,
        slots: Arc<InMemoryCapacityTableRepository>,
        provisioner: InstanceProvisioner,
    }

    fn fixture(settings: ProvisionerSettings, compute: SimulatedComputeRepository) -> Fixture {
        let compute = Arc::new(compute);
        let slots = Arc::new(InMemoryCapacityTableRepository::new());
        let capacity = Arc::new(CapacityTableService::new(slots.clone()));
        let provisioner = InstanceProvisioner::with_rng(
            compute.clone(),
            capacity,
            settings,
            StdRng::seed_from_u64(7),
        )
        .unwrap();
        Fixture {
            compute,
            slots,
            provisioner,
        }
    }

    async fn preload_live(compute: &SimulatedComputeRepository, count: usize) {
        for i in 0..count {
            compute
                .insert_existing(
                    &format!("i-existing-{i}"),
                    BTreeMap::from([(APPLICATION_TAG_KEY.to_string(), "sigpool-test".to_string())]),
                    LifecycleState::Running,
                )
                .await;
        }
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        let compute = Arc::new(SimulatedComputeRepository::default());
        let capacity = Arc::new(CapacityTableService::new(Arc::new(
            InMemoryCapacityTableRepository::new(),
        )));
        let result = InstanceProvisioner::new(compute, capacity, settings(0, &[]));
        assert!(matches!(result, Err(ControlPlaneError::Config(_))));
    }

    #[tokio::test]
    async fn test_on_demand_at_limit_returns_capacity_exceeded_without_launch() {
        let f = fixture(settings(3, &[]), SimulatedComputeRepository::new(Some(0)));
        preload_live(&f.compute, 3).await;

        let outcome = f.provisioner.provision(ProvisionMode::OnDemand).await;

        assert_eq!(outcome, ProvisionOutcome::CapacityExceeded { live: 3, limit: 3 });
        assert!(f.compute.launches().await.is_empty());
    }

    #[tokio::test]
    async fn test_on_demand_below_limit_launches_one_and_binds_slot() {
        let f = fixture(settings(3, &["subnet-a"]), SimulatedComputeRepository::new(Some(0)));
        preload_live(&f.compute, 2).await;
        f.slots
            .put_if_absent(CapacitySlot::new("s1", "rule-1", "/s1"))
            .await
            .unwrap();

        let outcome = f.provisioner.provision(ProvisionMode::OnDemand).await;

        let instance = match outcome {
            ProvisionOutcome::Created { instance } => instance,
            other => panic!("expected Created, got {other:?}"),
        };
        assert!(instance.instance.public_address.is_some());
        assert_eq!(instance.bound_slot.as_deref(), Some("s1"));
        let stored = f.slots.get("s1").await.unwrap().unwrap();
        assert_eq!(stored.instance_id, instance.instance.instance_id);

        let launches = f.compute.launches().await;
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].count, 1);
        assert_eq!(launches[0].placement.as_deref(), Some("subnet-a"));
    }

    #[tokio::test]
    async fn test_launch_request_carries_tags_template_and_payload() {
        let f = fixture(settings(1, &[]), SimulatedComputeRepository::new(Some(0)));

        f.provisioner.provision(ProvisionMode::OnDemand).await;

        let launch = f.compute.launches().await.remove(0);
        assert_eq!(launch.template, LaunchTemplateRef::Id("lt-0abc".to_string()));
        assert_eq!(launch.placement, None);
        assert_eq!(launch.tags.get("Name").map(String::as_str), Some("signalling-server"));
        assert_eq!(launch.tags.get("Type").map(String::as_str), Some("signalling"));
        assert_eq!(launch.tags.get("Application").map(String::as_str), Some("sigpool-test"));
        assert_eq!(launch.tags.get("CreatedBy").map(String::as_str), Some(CREATED_BY));

        let decoded = STANDARD.decode(&launch.bootstrap_payload).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "mm=10.1.2.3");
    }

    #[tokio::test]
    async fn test_on_demand_without_free_slot_still_creates() {
        let f = fixture(settings(2, &[]), SimulatedComputeRepository::new(Some(0)));

        let outcome = f.provisioner.provision(ProvisionMode::OnDemand).await;

        match outcome {
            ProvisionOutcome::Created { instance } => assert!(instance.bound_slot.is_none()),
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout_is_created_with_unknown_state() {
        let f = fixture(settings(2, &[]), SimulatedComputeRepository::new(None));

        let outcome = f.provisioner.provision(ProvisionMode::OnDemand).await;

        match outcome {
            ProvisionOutcome::Created { instance } => {
                assert_eq!(instance.instance.lifecycle_state, LifecycleState::Unknown);
            }
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let compute = SimulatedComputeRepository::new(Some(0));
        compute
            .set_launch_failure(Some("InsufficientInstanceCapacity".to_string()))
            .await;
        let f = fixture(settings(2, &[]), compute);

        let outcome = f.provisioner.provision(ProvisionMode::OnDemand).await;

        match outcome {
            ProvisionOutcome::LaunchFailed { reason } => {
                assert!(reason.contains("InsufficientInstanceCapacity"));
            }
            other => panic!("expected LaunchFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bulk_fill_launches_limit_regardless_of_pool() {
        let f = fixture(settings(2, &["subnet-a", "subnet-b"]), SimulatedComputeRepository::new(None));
        preload_live(&f.compute, 5).await;

        let outcome = f.provisioner.provision(ProvisionMode::BulkFill).await;

        assert_eq!(outcome.launched_count(), 2);
        let launches = f.compute.launches().await;
        assert_eq!(launches.len(), 2);
        for launch in &launches {
            assert_eq!(launch.count, 1);
            let placement = launch.placement.as_deref().unwrap();
            assert!(placement == "subnet-a" || placement == "subnet-b");
        }
        // Known overshoot: 5 already live plus 2 new against a limit of 2.
        assert_eq!(f.provisioner.live_count().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_bulk_fill_without_candidates_has_no_placement() {
        let f = fixture(settings(2, &[]), SimulatedComputeRepository::new(None));

        f.provisioner.provision(ProvisionMode::BulkFill).await;

        let launches = f.compute.launches().await;
        assert_eq!(launches.len(), 2);
        assert!(launches.iter().all(|l| l.placement.is_none()));
    }

    #[tokio::test]
    async fn test_bulk_fill_does_not_bind_slots() {
        let f = fixture(settings(2, &[]), SimulatedComputeRepository::new(Some(0)));
        f.slots
            .put_if_absent(CapacitySlot::new("s1", "rule-1", "/s1"))
            .await
            .unwrap();

        let outcome = f.provisioner.provision(ProvisionMode::BulkFill).await;

        let instances = match outcome {
            ProvisionOutcome::BulkCreated { instances } => instances,
            other => panic!("expected BulkCreated, got {other:?}"),
        };
        assert!(instances.iter().all(|i| i.bound_slot.is_none()));
        assert!(instances
            .iter()
            .all(|i| i.instance.lifecycle_state == LifecycleState::Pending));
        assert!(f.slots.get("s1").await.unwrap().unwrap().is_unassigned());
    }

    #[tokio::test]
    async fn test_bulk_fill_failure_names_successful_launches() {
        let compute = SimulatedComputeRepository::new(None);
        compute.set_launch_failure(Some("quota".to_string())).await;
        let f = fixture(settings(3, &[]), compute);

        let outcome = f.provisioner.provision(ProvisionMode::BulkFill).await;

        match outcome {
            ProvisionOutcome::LaunchFailed { reason } => {
                assert!(reason.contains("launch 1 of 3"));
                assert!(reason.contains("after 0 succeeded"));
            }
            other => panic!("expected LaunchFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_seeded_rng_gives_reproducible_placements() {
        let candidates = ["a", "b", "c", "d"];
        let mut runs = Vec::new();
        for _ in 0..2 {
            let f = fixture(settings(4, &candidates), SimulatedComputeRepository::new(None));
            f.provisioner.provision(ProvisionMode::BulkFill).await;
            let placements: Vec<_> = f
                .compute
                .launches()
                .await
                .into_iter()
                .map(|l| l.placement)
                .collect();
            runs.push(placements);
        }
        assert_eq!(runs[0], runs[1]);
    }

    proptest! {
        #[test]
        fn property_on_demand_launches_iff_below_limit(limit in 1u32..6, live in 0usize..9) {
            tokio_test::block_on(async {
                let f = fixture(settings(limit, &["a", "b"]), SimulatedComputeRepository::new(Some(0)));
                preload_live(&f.compute, live).await;

                let outcome = f.provisioner.provision(ProvisionMode::OnDemand).await;
                let launches = f.compute.launches().await.len();

                if live < limit as usize {
                    prop_assert_eq!(launches, 1);
                    prop_assert!(matches!(outcome, ProvisionOutcome::Created { .. }), "expected Created");
                } else {
                    prop_assert_eq!(launches, 0);
                    prop_assert_eq!(outcome, ProvisionOutcome::CapacityExceeded { live, limit });
                }
                Ok(())
            })?;
        }

        #[test]
        fn property_bulk_fill_launches_exactly_limit(limit in 1u32..6, live in 0usize..9) {
            tokio_test::block_on(async {
                let f = fixture(settings(limit, &["a", "b", "c"]), SimulatedComputeRepository::new(None));
                preload_live(&f.compute, live).await;

                f.provisioner.provision(ProvisionMode::BulkFill).await;

                prop_assert_eq!(f.compute.launches().await.len(), limit as usize);
                Ok(())
            })?;
        }
    }
}

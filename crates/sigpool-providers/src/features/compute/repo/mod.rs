use async_trait::async_trait;
use sigpool_core::{CoreError, LaunchTemplateRef, LifecycleState, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub template: LaunchTemplateRef,
    pub count: u32,
    pub tags: BTreeMap<String, String>,
    /// Base64 encoded bootstrap payload, passed through untouched.
    pub bootstrap_payload: String,
    pub placement: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub public_address: Option<String>,
    pub private_address: Option<String>,
    pub lifecycle_state: LifecycleState,
}

/// The compute API the provisioner launches workers through.
#[async_trait]
pub trait ComputeRepository: Send + Sync {
    /// Launch `request.count` instances and return their ids.
    async fn launch(&self, request: LaunchRequest) -> Result<Vec<String>>;

    async fn describe(&self, instance_id: &str) -> Result<InstanceDescription>;

    /// Count live (pending or running) instances carrying the given tag.
    async fn count_live(&self, tag_key: &str, tag_value: &str) -> Result<usize>;
}

#[derive(Debug, Clone)]
struct SimulatedInstance {
    tags: BTreeMap<String, String>,
    lifecycle_state: LifecycleState,
    describe_calls: u32,
    public_address: Option<String>,
    private_address: Option<String>,
}

/// Compute API stand-in for local runs and tests.
///
/// New instances start `pending` and receive addresses on the describe call
/// after `addresses_after_polls` earlier ones, or never when that is `None`.
#[derive(Clone)]
pub struct SimulatedComputeRepository {
    instances: Arc<RwLock<HashMap<String, SimulatedInstance>>>,
    launches: Arc<RwLock<Vec<LaunchRequest>>>,
    addresses_after_polls: Option<u32>,
    launch_failure: Arc<RwLock<Option<String>>>,
    next_address: Arc<RwLock<u32>>,
}

impl SimulatedComputeRepository {
    pub fn new(addresses_after_polls: Option<u32>) -> Self {
        Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
            launches: Arc::new(RwLock::new(Vec::new())),
            addresses_after_polls,
            launch_failure: Arc::new(RwLock::new(None)),
            next_address: Arc::new(RwLock::new(1)),
        }
    }

    /// Fail every subsequent launch with `reason`; `None` clears it.
    pub async fn set_launch_failure(&self, reason: Option<String>) {
        *self.launch_failure.write().await = reason;
    }

    /// Register an instance launched outside the provisioner.
    pub async fn insert_existing(
        &self,
        instance_id: &str,
        tags: BTreeMap<String, String>,
        lifecycle_state: LifecycleState,
    ) {
        let mut instances = self.instances.write().await;
        instances.insert(
            instance_id.to_string(),
            SimulatedInstance {
                tags,
                lifecycle_state,
                describe_calls: 0,
                public_address: None,
                private_address: None,
            },
        );
    }

    pub async fn set_state(&self, instance_id: &str, lifecycle_state: LifecycleState) -> bool {
        let mut instances = self.instances.write().await;
        match instances.get_mut(instance_id) {
            Some(instance) => {
                instance.lifecycle_state = lifecycle_state;
                true
            }
            None => false,
        }
    }

    pub async fn launches(&self) -> Vec<LaunchRequest> {
        self.launches.read().await.clone()
    }

    pub async fn describe_calls(&self, instance_id: &str) -> u32 {
        self.instances
            .read()
            .await
            .get(instance_id)
            .map(|i| i.describe_calls)
            .unwrap_or(0)
    }

    async fn allocate_addresses(&self) -> (String, String) {
        let mut next = self.next_address.write().await;
        let n = *next;
        *next += 1;
        (
            format!("203.0.113.{}", n % 250 + 1),
            format!("10.0.{}.{}", n / 250, n % 250 + 1),
        )
    }
}

impl Default for SimulatedComputeRepository {
    fn default() -> Self {
        Self::new(Some(0))
    }
}

#[async_trait]
impl ComputeRepository for SimulatedComputeRepository {
    async fn launch(&self, request: LaunchRequest) -> Result<Vec<String>> {
        if let Some(reason) = self.launch_failure.read().await.clone() {
            return Err(CoreError::ComputeError(reason));
        }
        if request.count == 0 {
            return Err(CoreError::InvalidRequest(
                "launch count must be at least 1".to_string(),
            ));
        }

        let mut ids = Vec::with_capacity(request.count as usize);
        {
            let mut instances = self.instances.write().await;
            for _ in 0..request.count {
                let id = format!("i-{}", &Uuid::new_v4().simple().to_string()[..17]);
                instances.insert(
                    id.clone(),
                    SimulatedInstance {
                        tags: request.tags.clone(),
                        lifecycle_state: LifecycleState::Pending,
                        describe_calls: 0,
                        public_address: None,
                        private_address: None,
                    },
                );
                ids.push(id);
            }
        }

        self.launches.write().await.push(request);
        Ok(ids)
    }

    async fn describe(&self, instance_id: &str) -> Result<InstanceDescription> {
        let due = {
            let mut instances = self.instances.write().await;
            let instance = instances.get_mut(instance_id).ok_or_else(|| {
                CoreError::ComputeError(format!("instance {instance_id} does not exist"))
            })?;
            let due = matches!(self.addresses_after_polls, Some(after) if instance.describe_calls >= after)
                && instance.public_address.is_none();
            instance.describe_calls += 1;
            due
        };

        if due {
            let (public, private) = self.allocate_addresses().await;
            let mut instances = self.instances.write().await;
            if let Some(instance) = instances.get_mut(instance_id) {
                instance.public_address = Some(public);
                instance.private_address = Some(private);
                if instance.lifecycle_state == LifecycleState::Pending {
                    instance.lifecycle_state = LifecycleState::Running;
                }
            }
        }

        let instances = self.instances.read().await;
        let instance = instances.get(instance_id).ok_or_else(|| {
            CoreError::ComputeError(format!("instance {instance_id} does not exist"))
        })?;

        Ok(InstanceDescription {
            instance_id: instance_id.to_string(),
            public_address: instance.public_address.clone(),
            private_address: instance.private_address.clone(),
            lifecycle_state: instance.lifecycle_state,
        })
    }

    async fn count_live(&self, tag_key: &str, tag_value: &str) -> Result<usize> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .filter(|i| i.lifecycle_state.is_live())
            .filter(|i| i.tags.get(tag_key).map(String::as_str) == Some(tag_value))
            .count())
    }
}

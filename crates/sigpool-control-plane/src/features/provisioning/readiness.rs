//! Bounded wait for a freshly launched instance to become addressable.

use sigpool_core::{LifecycleState, WorkerInstance};
use sigpool_providers::ComputeRepository;
use std::time::Duration;
use tracing::{debug, info};

use crate::shared::error::{ControlPlaneError, ControlPlaneResult};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    poll_interval: Duration,
    max_wait: Duration,
}

impl ReadinessPolicy {
    pub fn new(poll_interval: Duration, max_wait: Duration) -> ControlPlaneResult<Self> {
        if poll_interval.is_zero() {
            return Err(ControlPlaneError::Config(
                "readiness poll interval must be greater than zero".to_string(),
            ));
        }
        if max_wait < poll_interval {
            return Err(ControlPlaneError::Config(format!(
                "readiness max wait ({}s) must be at least the poll interval ({}s)",
                max_wait.as_secs_f64(),
                poll_interval.as_secs_f64()
            )));
        }

        Ok(Self {
            poll_interval,
            max_wait,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

/// Poll `describe` until a public address shows up or `max_wait` has passed.
///
/// Running out of time is not a failure: the instance is reported with an
/// `unknown` lifecycle state. Describe errors are returned to the caller.
pub async fn wait_for_address(
    compute: &dyn ComputeRepository,
    instance_id: &str,
    policy: &ReadinessPolicy,
) -> ControlPlaneResult<WorkerInstance> {
    let mut waited = Duration::ZERO;
    let mut polls = 0u32;

    loop {
        let description = compute.describe(instance_id).await?;
        polls += 1;

        if description.public_address.is_some() {
            info!(
                %instance_id,
                polls,
                public_address = ?description.public_address,
                state = %description.lifecycle_state,
                "Instance is addressable"
            );
            return Ok(WorkerInstance {
                instance_id: instance_id.to_string(),
                private_address: description.private_address,
                public_address: description.public_address,
                lifecycle_state: description.lifecycle_state,
            });
        }

        if waited >= policy.max_wait {
            info!(
                %instance_id,
                polls,
                waited_secs = waited.as_secs_f64(),
                "Instance not addressable before readiness deadline"
            );
            return Ok(WorkerInstance {
                instance_id: instance_id.to_string(),
                private_address: description.private_address,
                public_address: None,
                lifecycle_state: LifecycleState::Unknown,
            });
        }

        debug!(%instance_id, polls, state = %description.lifecycle_state, "Waiting for instance address");
        tokio::time::sleep(policy.poll_interval).await;
        waited += policy.poll_interval;
    }
}

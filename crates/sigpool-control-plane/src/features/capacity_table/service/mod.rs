use crate::features::capacity_table::repo::CapacityTableRepository;
use crate::shared::error::ControlPlaneResult;
use crate::shared::types::SeedReport;
use sigpool_core::CapacitySlot;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts made by a conditional bind before giving up on a contended table.
pub const MAX_CONDITIONAL_ATTEMPTS: usize = 3;

/// How a new instance is written into a free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingMode {
    /// Scan for a free slot, then write without re-checking it. Two
    /// concurrent binds can pick the same slot; the last write wins.
    #[default]
    Unconditional,
    /// Write only if the slot is still empty, rescanning on conflict.
    Conditional,
}

pub struct CapacityTableService {
    repo: Arc<dyn CapacityTableRepository>,
}

impl CapacityTableService {
    pub fn new(repo: Arc<dyn CapacityTableRepository>) -> Self {
        Self { repo }
    }

    /// Bind `instance_id` to one unassigned slot. Returns the slot key, or
    /// `None` when no free slot exists.
    pub async fn bind_free_slot(
        &self,
        instance_id: &str,
        mode: BindingMode,
    ) -> ControlPlaneResult<Option<String>> {
        match mode {
            BindingMode::Unconditional => {
                let Some(slot) = self.repo.find_unassigned().await? else {
                    info!(%instance_id, "No unassigned capacity slot, instance left unbound");
                    return Ok(None);
                };
                self.repo
                    .assign_instance(&slot.slot_key, instance_id)
                    .await?;
                info!(%instance_id, slot_key = %slot.slot_key, "Bound instance to capacity slot");
                Ok(Some(slot.slot_key))
            }
            BindingMode::Conditional => {
                for attempt in 1..=MAX_CONDITIONAL_ATTEMPTS {
                    let Some(slot) = self.repo.find_unassigned().await? else {
                        info!(%instance_id, "No unassigned capacity slot, instance left unbound");
                        return Ok(None);
                    };
                    if self
                        .repo
                        .assign_instance_if_unassigned(&slot.slot_key, instance_id)
                        .await?
                    {
                        info!(%instance_id, slot_key = %slot.slot_key, attempt, "Bound instance to capacity slot");
                        return Ok(Some(slot.slot_key));
                    }
                    debug!(%instance_id, slot_key = %slot.slot_key, attempt, "Slot taken by a concurrent bind, rescanning");
                }
                warn!(
                    %instance_id,
                    attempts = MAX_CONDITIONAL_ATTEMPTS,
                    "Gave up binding instance after repeated slot conflicts"
                );
                Ok(None)
            }
        }
    }

    /// Populate the table. Existing slot keys are left untouched.
    pub async fn seed(
        &self,
        slots: Vec<CapacitySlot>,
        clear_first: bool,
    ) -> ControlPlaneResult<SeedReport> {
        if clear_first {
            let removed = self.repo.clear().await?;
            info!(removed, "Cleared capacity table before seeding");
        }

        let mut report = SeedReport::default();
        for slot in slots {
            let slot_key = slot.slot_key.clone();
            if self.repo.put_if_absent(slot).await? {
                report.added += 1;
            } else {
                debug!(%slot_key, "Capacity slot already present, skipped");
                report.skipped += 1;
            }
        }

        info!(added = report.added, skipped = report.skipped, "Seeded capacity table");
        Ok(report)
    }

    pub async fn list_slots(&self) -> ControlPlaneResult<Vec<CapacitySlot>> {
        self.repo.list().await
    }
}

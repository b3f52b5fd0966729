use async_trait::async_trait;
use sigpool_core::CapacitySlot;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::shared::error::{ControlPlaneError, ControlPlaneResult};

/// Storage for capacity slots. Slots are never deleted by the control loop;
/// `clear` exists for administrative reseeding only.
#[async_trait]
pub trait CapacityTableRepository: Send + Sync {
    /// Insert a slot unless its key already exists. Returns whether it was inserted.
    async fn put_if_absent(&self, slot: CapacitySlot) -> ControlPlaneResult<bool>;
    async fn get(&self, slot_key: &str) -> ControlPlaneResult<Option<CapacitySlot>>;
    async fn list(&self) -> ControlPlaneResult<Vec<CapacitySlot>>;
    /// Any one slot with an empty instance id.
    async fn find_unassigned(&self) -> ControlPlaneResult<Option<CapacitySlot>>;
    /// Write the instance id without checking the slot's current value.
    async fn assign_instance(&self, slot_key: &str, instance_id: &str) -> ControlPlaneResult<()>;
    /// Write the instance id only if the slot is still unassigned.
    async fn assign_instance_if_unassigned(
        &self,
        slot_key: &str,
        instance_id: &str,
    ) -> ControlPlaneResult<bool>;
    async fn clear(&self) -> ControlPlaneResult<usize>;
}

#[derive(Clone, Default)]
pub struct InMemoryCapacityTableRepository {
    slots: Arc<RwLock<BTreeMap<String, CapacitySlot>>>,
}

impl InMemoryCapacityTableRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CapacityTableRepository for InMemoryCapacityTableRepository {
    async fn put_if_absent(&self, slot: CapacitySlot) -> ControlPlaneResult<bool> {
        if slot.slot_key.is_empty() {
            return Err(ControlPlaneError::InvalidRequest(
                "slot key must not be empty".to_string(),
            ));
        }

        let mut slots = self.slots.write().await;
        if slots.contains_key(&slot.slot_key) {
            return Ok(false);
        }
        slots.insert(slot.slot_key.clone(), slot);
        Ok(true)
    }

    async fn get(&self, slot_key: &str) -> ControlPlaneResult<Option<CapacitySlot>> {
        let slots = self.slots.read().await;
        Ok(slots.get(slot_key).cloned())
    }

    async fn list(&self) -> ControlPlaneResult<Vec<CapacitySlot>> {
        let slots = self.slots.read().await;
        Ok(slots.values().cloned().collect())
    }

    async fn find_unassigned(&self) -> ControlPlaneResult<Option<CapacitySlot>> {
        let slots = self.slots.read().await;
        Ok(slots.values().find(|s| s.is_unassigned()).cloned())
    }

    async fn assign_instance(&self, slot_key: &str, instance_id: &str) -> ControlPlaneResult<()> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(slot_key)
            .ok_or_else(|| ControlPlaneError::SlotNotFound(slot_key.to_string()))?;
        slot.instance_id = instance_id.to_string();
        Ok(())
    }

    async fn assign_instance_if_unassigned(
        &self,
        slot_key: &str,
        instance_id: &str,
    ) -> ControlPlaneResult<bool> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(slot_key)
            .ok_or_else(|| ControlPlaneError::SlotNotFound(slot_key.to_string()))?;
        if !slot.is_unassigned() {
            return Ok(false);
        }
        slot.instance_id = instance_id.to_string();
        Ok(true)
    }

    async fn clear(&self) -> ControlPlaneResult<usize> {
        let mut slots = self.slots.write().await;
        let removed = slots.len();
        slots.clear();
        Ok(removed)
    }
}

//! The single pane that currently receives keyboard input and programmatic sends.
//!
//! States: `Unset` or `ActiveBound(id)`. The selector itself is unconditional;
//! the registry is what keeps it pointing at mounted panes.

use parking_lot::Mutex;

use crate::target::InstanceId;

#[derive(Default)]
pub struct ActiveTargetSelector {
    active: Mutex<Option<InstanceId>>,
}

impl ActiveTargetSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the active pointer.
    pub fn set_active(&self, instance_id: InstanceId) {
        let mut active = self.active.lock();
        if active.as_ref() != Some(&instance_id) {
            tracing::debug!(instance = %instance_id, "active instance changed");
        }
        *active = Some(instance_id);
    }

    pub fn get_active(&self) -> Option<InstanceId> {
        self.active.lock().clone()
    }

    pub fn is_active(&self, instance_id: &InstanceId) -> bool {
        self.active.lock().as_ref() == Some(instance_id)
    }

    /// `Unset -> ActiveBound(id)`; returns whether the claim took effect.
    pub(crate) fn claim_if_unset(&self, instance_id: &InstanceId) -> bool {
        let mut active = self.active.lock();
        if active.is_some() {
            return false;
        }
        tracing::debug!(instance = %instance_id, "first registration claims active instance");
        *active = Some(instance_id.clone());
        true
    }

    /// `ActiveBound(id) -> Unset`, only when `id` is the bound instance.
    pub(crate) fn clear_if(&self, instance_id: &InstanceId) -> bool {
        let mut active = self.active.lock();
        if active.as_ref() == Some(instance_id) {
            tracing::debug!(instance = %instance_id, "active instance cleared");
            *active = None;
            true
        } else {
            false
        }
    }
}

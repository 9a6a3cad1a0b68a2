//! Target registry: the set of currently-mounted chat panes.
//!
//! Entries are keyed by `InstanceId` and kept in registration order. Each
//! successful `register` gets a fresh generation, and a `RegistrationHandle`
//! only ever removes the entry carrying its own generation. That way the
//! unmount of an old pane racing the mount of its replacement (same id) is a
//! logged no-op instead of tearing down the new entry.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::active::ActiveTargetSelector;
use crate::app_logger::DiagnosticsLog;
use crate::target::{ChatId, ChatPane, ChatTarget, InstanceId, PaneRegistration, PaneStatus, SubChatId};

const LOG_SOURCE: &str = "registry";

/// Pane-local conversation cache state, reset on workspace switch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaneSession {
    pub current_sub_chat: Option<SubChatId>,
    pub loaded_message_ids: Vec<String>,
    pub messages_synced: bool,
}

struct Entry {
    instance_id: InstanceId,
    target: ChatTarget,
    pane: Arc<dyn ChatPane>,
    status: PaneStatus,
    session: PaneSession,
    generation: u64,
}

impl Entry {
    fn snapshot(&self) -> RegisteredPane {
        RegisteredPane {
            instance_id: self.instance_id.clone(),
            target: self.target.clone(),
            pane: Arc::clone(&self.pane),
            status: self.status,
            session: self.session.clone(),
            generation: self.generation,
        }
    }
}

/// Point-in-time copy of a registry entry.
#[derive(Clone)]
pub struct RegisteredPane {
    pub instance_id: InstanceId,
    pub target: ChatTarget,
    pub pane: Arc<dyn ChatPane>,
    pub status: PaneStatus,
    pub session: PaneSession,
    pub generation: u64,
}

impl std::fmt::Debug for RegisteredPane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPane")
            .field("instance_id", &self.instance_id)
            .field("target", &self.target)
            .field("status", &self.status)
            .field("session", &self.session)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

pub struct TargetRegistry {
    entries: Mutex<Vec<Entry>>,
    next_generation: AtomicU64,
    active: Arc<ActiveTargetSelector>,
    diagnostics: Arc<DiagnosticsLog>,
}

impl TargetRegistry {
    pub fn new(active: Arc<ActiveTargetSelector>, diagnostics: Arc<DiagnosticsLog>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_generation: AtomicU64::new(1),
            active,
            diagnostics,
        }
    }

    pub fn active_selector(&self) -> &Arc<ActiveTargetSelector> {
        &self.active
    }

    /// Insert or overwrite the entry at the registration's instance id.
    ///
    /// The first registration in an empty session becomes the active target.
    pub fn register(self: &Arc<Self>, registration: PaneRegistration) -> RegistrationHandle {
        let instance_id = registration.resolved_instance_id();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.instance_id == instance_id) {
            tracing::debug!(
                instance = %instance_id,
                old_generation = entry.generation,
                generation,
                "overwriting registration"
            );
            if !entry.target.same_identity(&registration.target) {
                entry.session = PaneSession::default();
            }
            entry.target = registration.target;
            entry.pane = registration.pane;
            entry.status = registration.status;
            entry.generation = generation;
        } else {
            tracing::debug!(instance = %instance_id, generation, "registering chat view");
            entries.push(Entry {
                instance_id: instance_id.clone(),
                target: registration.target,
                pane: registration.pane,
                status: registration.status,
                session: PaneSession::default(),
                generation,
            });
        }
        self.active.claim_if_unset(&instance_id);
        drop(entries);

        RegistrationHandle {
            registry: Arc::clone(self),
            instance_id,
            generation,
            released: false,
        }
    }

    /// Remove the entry at `instance_id` if it still carries `generation`.
    fn unregister(&self, instance_id: &InstanceId, generation: u64) -> bool {
        let removed = self.remove_entry(instance_id, generation);
        if !removed {
            self.diagnostics.warn(
                LOG_SOURCE,
                format!("unregister ignored: {instance_id} (generation {generation}) is not registered"),
            );
        }
        removed
    }

    fn remove_entry(&self, instance_id: &InstanceId, generation: u64) -> bool {
        let mut entries = self.entries.lock();
        let Some(index) = entries
            .iter()
            .position(|e| &e.instance_id == instance_id && e.generation == generation)
        else {
            return false;
        };
        entries.remove(index);
        self.active.clear_if(instance_id);
        tracing::debug!(instance = %instance_id, generation, "unregistered chat view");
        true
    }

    pub fn get(&self, instance_id: &InstanceId) -> Option<RegisteredPane> {
        self.entries
            .lock()
            .iter()
            .find(|e| &e.instance_id == instance_id)
            .map(Entry::snapshot)
    }

    /// Snapshot in registration order.
    pub fn get_all(&self) -> Vec<RegisteredPane> {
        self.entries.lock().iter().map(Entry::snapshot).collect()
    }

    pub fn contains(&self, instance_id: &InstanceId) -> bool {
        self.entries.lock().iter().any(|e| &e.instance_id == instance_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Explicit focus claim. Refuses ids that are not registered so the
    /// active pointer never dangles.
    pub fn activate(&self, instance_id: &InstanceId) -> bool {
        let entries = self.entries.lock();
        if entries.iter().any(|e| &e.instance_id == instance_id) {
            self.active.set_active(instance_id.clone());
            true
        } else {
            drop(entries);
            self.diagnostics
                .warn(LOG_SOURCE, format!("focus claim ignored: {instance_id} is not registered"));
            false
        }
    }

    /// The active pane, if the pointer is set.
    pub fn active_pane(&self) -> Option<RegisteredPane> {
        let entries = self.entries.lock();
        let active = self.active.get_active()?;
        entries.iter().find(|e| e.instance_id == active).map(Entry::snapshot)
    }

    /// Update streaming/readiness/archived flags without a re-registration cycle.
    pub fn update_status(&self, instance_id: &InstanceId, status: PaneStatus) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| &e.instance_id == instance_id) {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => {
                drop(entries);
                self.diagnostics
                    .warn(LOG_SOURCE, format!("status update ignored: {instance_id} is not registered"));
                false
            }
        }
    }

    pub fn update_session(&self, instance_id: &InstanceId, update: impl FnOnce(&mut PaneSession)) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| &e.instance_id == instance_id) {
            Some(entry) => {
                update(&mut entry.session);
                true
            }
            None => {
                drop(entries);
                self.diagnostics
                    .warn(LOG_SOURCE, format!("session update ignored: {instance_id} is not registered"));
                false
            }
        }
    }

    /// Reset every pane's conversation cache to its initial empty state.
    pub fn reset_sessions(&self) {
        for entry in self.entries.lock().iter_mut() {
            entry.session = PaneSession::default();
        }
    }

    /// Mark panes showing `chat_id` as synced with the freshly loaded messages.
    pub fn mark_synced(&self, chat_id: &ChatId, message_ids: &[String]) -> usize {
        let mut synced = 0;
        for entry in self.entries.lock().iter_mut() {
            if &entry.target.chat_id == chat_id {
                entry.session.loaded_message_ids = message_ids.to_vec();
                entry.session.messages_synced = true;
                synced += 1;
            }
        }
        synced
    }

    fn update_in_place(&self, instance_id: &InstanceId, generation: u64, registration: PaneRegistration) -> bool {
        let mut entries = self.entries.lock();
        match entries
            .iter_mut()
            .find(|e| &e.instance_id == instance_id && e.generation == generation)
        {
            Some(entry) => {
                entry.target = registration.target;
                entry.pane = registration.pane;
                entry.status = registration.status;
                true
            }
            None => false,
        }
    }
}

/// Returned by `register`; the owning pane keeps it for as long as it is
/// mounted. Dropping it unregisters the pane.
pub struct RegistrationHandle {
    registry: Arc<TargetRegistry>,
    instance_id: InstanceId,
    generation: u64,
    released: bool,
}

impl RegistrationHandle {
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Apply a prop change of the owning pane.
    ///
    /// Same identity (`instance_id`, `chat_id`, `sub_chat_id`) mutates the entry
    /// in place and leaves the active pointer alone. A changed identity
    /// unregisters and registers again.
    pub fn update(&mut self, registration: PaneRegistration) {
        let next_id = registration.resolved_instance_id();
        let same_identity = next_id == self.instance_id
            && self
                .registry
                .get(&self.instance_id)
                .is_some_and(|e| e.generation == self.generation && e.target.same_identity(&registration.target));

        if same_identity && self.registry.update_in_place(&self.instance_id, self.generation, registration.clone()) {
            return;
        }

        tracing::debug!(
            from = %self.instance_id,
            to = %next_id,
            "identity changed, re-registering chat view"
        );
        self.registry.unregister(&self.instance_id, self.generation);
        let mut fresh = self.registry.register(registration);
        fresh.released = true;
        self.instance_id = fresh.instance_id.clone();
        self.generation = fresh.generation;
    }

    /// Remove this exact registration. Clears the active pointer if it
    /// referenced this pane. A stale handle is logged.
    pub fn unregister(mut self) -> bool {
        self.released = true;
        self.registry.unregister(&self.instance_id, self.generation)
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        // A remount may already own the slot; that is not worth a warning.
        if !self.released {
            self.registry.remove_entry(&self.instance_id, self.generation);
        }
    }
}

//! Workspace change detection and one-shot per-workspace mode initialization.
//!
//! This module only decides *what* has to happen on a change; the
//! coordinator carries the plan out (layout load, session reset, background
//! refresh).

use parking_lot::Mutex;

use crate::tabs::SubChatMeta;
use crate::target::ChatId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwitchPlan {
    /// First workspace seen this session. Nothing to reset.
    Initial(ChatId),
    Unchanged,
    Switched { previous: ChatId, next: ChatId },
}

impl SwitchPlan {
    /// Whether pane caches and tab modes have to be reset.
    pub fn requires_reset(&self) -> bool {
        matches!(self, SwitchPlan::Switched { .. })
    }

    pub fn target(&self) -> Option<&ChatId> {
        match self {
            SwitchPlan::Initial(next) | SwitchPlan::Switched { next, .. } => Some(next),
            SwitchPlan::Unchanged => None,
        }
    }
}

#[derive(Default)]
struct Selection {
    current: Option<ChatId>,
    /// Set by `deselect`; the next selection counts as a switch away from it.
    deselected: Option<ChatId>,
}

#[derive(Default)]
pub struct WorkspaceSwitchCoordinator {
    selection: Mutex<Selection>,
}

impl WorkspaceSwitchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ChatId> {
        self.selection.lock().current.clone()
    }

    /// Record the externally supplied workspace id and classify the change.
    pub fn on_workspace_changed(&self, next: &ChatId) -> SwitchPlan {
        let mut selection = self.selection.lock();
        let plan = match (selection.current.as_ref(), selection.deselected.as_ref()) {
            (Some(previous), _) if previous == next => SwitchPlan::Unchanged,
            (Some(previous), _) | (None, Some(previous)) => SwitchPlan::Switched {
                previous: previous.clone(),
                next: next.clone(),
            },
            (None, None) => SwitchPlan::Initial(next.clone()),
        };
        selection.current = Some(next.clone());
        selection.deselected = None;
        tracing::debug!(?plan, "workspace changed");
        plan
    }

    /// Clear the selection if `chat_id` is the selected workspace, e.g. when
    /// it was archived. Returns whether it was selected.
    pub fn deselect(&self, chat_id: &ChatId) -> bool {
        let mut selection = self.selection.lock();
        if selection.current.as_ref() != Some(chat_id) {
            return false;
        }
        let current = selection.current.take();
        selection.deselected = current;
        tracing::debug!(chat = %chat_id, "workspace deselected");
        true
    }
}

/// Applies per-tab modes exactly once per workspace load.
#[derive(Default)]
pub struct ModeInitializer {
    initialized_for: Mutex<Option<ChatId>>,
}

impl ModeInitializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `apply` for every tab when `chat_id` hasn't been initialized since
    /// the last reset. An empty metadata list means the data hasn't arrived
    /// yet and leaves the initializer armed.
    pub fn initialize(&self, chat_id: &ChatId, metas: &[SubChatMeta], mut apply: impl FnMut(&SubChatMeta)) -> bool {
        if metas.is_empty() {
            return false;
        }
        let mut marker = self.initialized_for.lock();
        if marker.as_ref() == Some(chat_id) {
            return false;
        }
        for meta in metas {
            apply(meta);
        }
        *marker = Some(chat_id.clone());
        tracing::debug!(chat = %chat_id, tabs = metas.len(), "initialized tab modes");
        true
    }

    pub fn reset(&self) {
        *self.initialized_for.lock() = None;
    }

    pub fn initialized_for(&self) -> Option<ChatId> {
        self.initialized_for.lock().clone()
    }
}

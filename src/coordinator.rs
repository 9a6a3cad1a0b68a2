//! `ChatCoordinator`: the injectable state container tying the registry,
//! dispatch gate, tab manager, undo stack and workspace switching together.
//!
//! Locks are never held across an await. Lock order where two are taken:
//! mode marker, then tabs.

use anyhow::Context;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;

use crate::active::ActiveTargetSelector;
use crate::app_logger::DiagnosticsLog;
use crate::config::CoordinatorConfig;
use crate::data::{ChatDataSource, WorkspaceMessage};
use crate::dispatch::{DispatchGate, DispatchOutcome};
use crate::layout_store::{JsonFileStore, KeyValueStore, TabLayoutStore};
use crate::registry::{RegistrationHandle, TargetRegistry};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::shortcuts::{KeyEvent, ShortcutAction, ShortcutDispatcher};
use crate::swr::{Revalidating, Snapshot};
use crate::tabs::{CloseOutcome, CycleDirection, SubChatMeta, TabLifecycleManager};
use crate::target::{ChatId, ChatMode, InstanceId, OutgoingMessage, PaneRegistration, SubChatId};
use crate::undo::{UndoItem, UndoRecord, UndoStack};
use crate::workspace_switch::{ModeInitializer, SwitchPlan, WorkspaceSwitchCoordinator};

const LOG_SOURCE: &str = "coordinator";

type MessageCache = Revalidating<ChatId, Vec<WorkspaceMessage>>;

pub struct ChatCoordinator {
    config: CoordinatorConfig,
    diagnostics: Arc<DiagnosticsLog>,
    registry: Arc<TargetRegistry>,
    gate: DispatchGate,
    tabs: Mutex<TabLifecycleManager>,
    undo: UndoStack,
    layouts: Option<TabLayoutStore>,
    switcher: WorkspaceSwitchCoordinator,
    modes: ModeInitializer,
    messages: Arc<MessageCache>,
    data: Arc<dyn ChatDataSource>,
    shortcuts: ShortcutDispatcher,
    /// Archived workspaces, most recent last.
    archived: Mutex<Vec<ChatId>>,
    sidebar_open: AtomicBool,
}

impl ChatCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        data: Arc<dyn ChatDataSource>,
        store: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let diagnostics = Arc::new(DiagnosticsLog::default());
        let registry = Arc::new(TargetRegistry::new(
            Arc::new(ActiveTargetSelector::new()),
            Arc::clone(&diagnostics),
        ));
        let gate = DispatchGate::new(Arc::clone(&registry), Arc::clone(&diagnostics));
        let layouts = config
            .persist_tab_layout
            .then(|| TabLayoutStore::new(store, config.window_prefix.clone()));

        tracing::info!(
            window = %config.window_prefix,
            host = ?config.host,
            undo_window_ms = config.undo_window_ms,
            "chat coordinator created"
        );

        Self {
            undo: UndoStack::new(scheduler, config.undo_window()),
            shortcuts: ShortcutDispatcher::new(config.key_profile()),
            config,
            diagnostics,
            registry,
            gate,
            tabs: Mutex::new(TabLifecycleManager::new()),
            layouts,
            switcher: WorkspaceSwitchCoordinator::new(),
            modes: ModeInitializer::new(),
            messages: Arc::new(Revalidating::new()),
            data,
            archived: Mutex::new(Vec::new()),
            sidebar_open: AtomicBool::new(true),
        }
    }

    /// Production wiring: layouts in the config dir, undo timers on the
    /// current tokio runtime.
    pub fn from_config(config: CoordinatorConfig, data: Arc<dyn ChatDataSource>) -> anyhow::Result<Self> {
        let scheduler = TokioScheduler::current().context("chat coordinator needs a tokio runtime")?;
        let store = JsonFileStore::open(config.tab_layout_path());
        Ok(Self::new(config, data, Arc::new(store), Arc::new(scheduler)))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticsLog> {
        &self.diagnostics
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn undo_stack(&self) -> &UndoStack {
        &self.undo
    }

    pub fn shortcuts(&self) -> &ShortcutDispatcher {
        &self.shortcuts
    }

    pub fn current_workspace(&self) -> Option<ChatId> {
        self.switcher.current()
    }

    fn noop(&self, message: String) {
        self.diagnostics.warn(LOG_SOURCE, message);
    }

    // -- panes and routing ---------------------------------------------------

    pub fn register_chat_view(&self, registration: PaneRegistration) -> RegistrationHandle {
        self.registry.register(registration)
    }

    pub fn set_active_instance(&self, instance_id: &InstanceId) -> bool {
        self.registry.activate(instance_id)
    }

    /// Claim focus for a pane and move keyboard focus into its editor.
    pub fn focus_instance(&self, instance_id: &InstanceId) -> bool {
        if !self.registry.activate(instance_id) {
            return false;
        }
        if let Some(entry) = self.registry.get(instance_id) {
            entry.pane.focus_editor();
            if entry.pane.is_auto_scroll() {
                entry.pane.scroll_to_bottom();
            }
        }
        true
    }

    pub fn active_instance(&self) -> Option<InstanceId> {
        self.registry.active_selector().get_active()
    }

    pub async fn send_to_active(&self, message: OutgoingMessage) -> anyhow::Result<DispatchOutcome> {
        self.gate.send_to_active(message).await
    }

    pub async fn send_to_instance(
        &self,
        instance_id: &InstanceId,
        message: OutgoingMessage,
    ) -> anyhow::Result<DispatchOutcome> {
        self.gate.send_to_instance(instance_id, message).await
    }

    pub async fn stop_active(&self) -> anyhow::Result<DispatchOutcome> {
        self.gate.stop_active().await
    }

    // -- tabs ----------------------------------------------------------------

    fn persist_layout(&self, chat_id: &ChatId) {
        let Some(layouts) = &self.layouts else { return };
        let layout = self.tabs.lock().layout(chat_id);
        if let Err(e) = layouts.save(chat_id, &layout) {
            self.noop(format!("failed to persist tab layout for {chat_id}: {e}"));
        }
    }

    fn load_layout(&self, chat_id: &ChatId) {
        let layout = self
            .layouts
            .as_ref()
            .map(|l| l.load(chat_id))
            .unwrap_or_default();
        self.tabs.lock().load(chat_id, layout);
    }

    pub fn open_tabs(&self, chat_id: &ChatId) -> Vec<SubChatId> {
        self.tabs.lock().open_tabs(chat_id)
    }

    pub fn display_order(&self, chat_id: &ChatId) -> Vec<SubChatId> {
        self.tabs.lock().display_order(chat_id)
    }

    pub fn active_tab(&self, chat_id: &ChatId) -> Option<SubChatId> {
        self.tabs.lock().active_tab(chat_id)
    }

    pub fn tab_mode(&self, chat_id: &ChatId, tab: &SubChatId) -> Option<ChatMode> {
        self.tabs.lock().mode(chat_id, tab)
    }

    pub fn open_tab(&self, chat_id: &ChatId, tab: &SubChatId) {
        self.tabs.lock().open(chat_id, tab);
        self.persist_layout(chat_id);
    }

    /// Create a tab through the data layer and open it.
    pub async fn new_tab(&self, chat_id: &ChatId, mode: ChatMode) -> anyhow::Result<SubChatMeta> {
        let meta = self
            .data
            .create_sub_chat(chat_id, mode)
            .await
            .with_context(|| format!("failed to create tab in {chat_id}"))?;
        {
            let mut tabs = self.tabs.lock();
            tabs.open(chat_id, &meta.id);
            tabs.set_mode(chat_id, &meta.id, meta.mode);
        }
        self.persist_layout(chat_id);
        Ok(meta)
    }

    pub fn set_tab_selected(&self, chat_id: &ChatId, tab: &SubChatId, selected: bool) {
        self.tabs.lock().set_selected(chat_id, tab, selected);
    }

    fn after_close(&self, chat_id: &ChatId, outcome: CloseOutcome) -> CloseOutcome {
        match &outcome {
            CloseOutcome::Closed(closed) => {
                for tab in closed {
                    self.undo.push(UndoItem::sub_chat(chat_id.clone(), tab.clone()));
                }
                self.persist_layout(chat_id);
            }
            CloseOutcome::Refused(reason) => {
                tracing::debug!(chat = %chat_id, ?reason, "tab close refused");
            }
        }
        outcome
    }

    pub fn close_tab(&self, chat_id: &ChatId, tab: &SubChatId) -> CloseOutcome {
        let outcome = self.tabs.lock().close(chat_id, tab);
        self.after_close(chat_id, outcome)
    }

    pub fn close_other_tabs(&self, chat_id: &ChatId, keep: &SubChatId) -> CloseOutcome {
        let outcome = self.tabs.lock().close_others(chat_id, keep);
        self.after_close(chat_id, outcome)
    }

    pub fn close_tabs_right_of(&self, chat_id: &ChatId, visual_index: usize) -> CloseOutcome {
        let outcome = self.tabs.lock().close_right_of(chat_id, visual_index);
        self.after_close(chat_id, outcome)
    }

    pub fn close_selected_tabs(&self, chat_id: &ChatId) -> CloseOutcome {
        let outcome = self.tabs.lock().close_selected(chat_id);
        self.after_close(chat_id, outcome)
    }

    pub fn cycle_tab(&self, chat_id: &ChatId, direction: CycleDirection) -> Option<SubChatId> {
        let next = self.tabs.lock().cycle(chat_id, direction);
        if next.is_some() {
            self.persist_layout(chat_id);
        }
        next
    }

    pub fn toggle_pin(&self, chat_id: &ChatId, tab: &SubChatId) -> bool {
        let pinned = self.tabs.lock().toggle_pin(chat_id, tab);
        self.persist_layout(chat_id);
        pinned
    }

    pub fn set_pinned(&self, chat_id: &ChatId, tabs: &[SubChatId], pinned: bool) -> usize {
        let changed = self.tabs.lock().set_pinned(chat_id, tabs, pinned);
        if changed > 0 {
            self.persist_layout(chat_id);
        }
        changed
    }

    // -- undo and archive ----------------------------------------------------

    pub fn push_undo(&self, item: UndoItem) -> UndoRecord {
        self.undo.push(item)
    }

    /// Pop the most recent undo item and reverse it. A failed workspace
    /// restore or the failed refresh that follows it is returned to the
    /// caller; the item is not re-pushed.
    pub async fn undo_last(&self) -> anyhow::Result<Option<UndoItem>> {
        let Some(item) = self.undo.undo_last() else {
            self.noop("undo ignored: nothing to undo".to_string());
            return Ok(None);
        };
        match &item {
            UndoItem::Workspace { chat_id } => {
                self.restore_workspace(chat_id).await?;
            }
            UndoItem::SubChat { sub_chat_id, chat_id } => {
                self.open_tab(chat_id, sub_chat_id);
            }
        }
        Ok(Some(item))
    }

    /// Restore through the data layer, re-select the workspace and wait for
    /// its message refresh.
    async fn restore_workspace(&self, chat_id: &ChatId) -> anyhow::Result<()> {
        self.data.restore_workspace(chat_id).await.map_err(|e| {
            tracing::error!(chat = %chat_id, "restore failed: {e:#}");
            e.context(format!("failed to restore workspace {chat_id}"))
        })?;
        self.archived.lock().retain(|c| c != chat_id);
        self.undo.retire(&UndoItem::workspace(chat_id.clone()));

        if let Some(refresh) = self.switch_workspace(chat_id) {
            refresh
                .await
                .with_context(|| format!("message refresh task for {chat_id} did not finish"))?
                .with_context(|| format!("workspace {chat_id} restored but its messages did not load"))?;
        }
        Ok(())
    }

    /// Archive through the data layer, then make it undoable. An archived
    /// workspace that was selected is deselected.
    pub async fn archive_workspace(&self, chat_id: &ChatId) -> anyhow::Result<UndoRecord> {
        self.data.archive_workspace(chat_id).await.map_err(|e| {
            tracing::error!(chat = %chat_id, "archive failed: {e:#}");
            e.context(format!("failed to archive workspace {chat_id}"))
        })?;
        {
            let mut archived = self.archived.lock();
            archived.retain(|c| c != chat_id);
            archived.push(chat_id.clone());
        }
        self.switcher.deselect(chat_id);
        Ok(self.undo.push(UndoItem::workspace(chat_id.clone())))
    }

    /// Restore the most recently archived workspace, even after its undo
    /// window has passed.
    pub async fn restore_archived_workspace(&self) -> anyhow::Result<Option<ChatId>> {
        let Some(chat_id) = self.archived.lock().last().cloned() else {
            self.noop("restore ignored: no archived workspace".to_string());
            return Ok(None);
        };
        self.restore_workspace(&chat_id).await?;
        Ok(Some(chat_id))
    }

    // -- workspace switching -------------------------------------------------

    /// React to a change of the selected workspace.
    ///
    /// Loads the new layout and, on an actual switch, resets pane sessions and
    /// the mode marker. Messages are marked stale and refreshed in the
    /// background; the previous ones stay readable until the refresh lands.
    /// The returned handle resolves with the refresh result.
    pub fn switch_workspace(&self, chat_id: &ChatId) -> Option<JoinHandle<anyhow::Result<()>>> {
        let plan = self.switcher.on_workspace_changed(chat_id);
        if plan == SwitchPlan::Unchanged {
            return None;
        }
        self.load_layout(chat_id);
        if plan.requires_reset() {
            self.registry.reset_sessions();
            self.modes.reset();
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                self.noop(format!("message refresh for {chat_id} skipped: no tokio runtime"));
                return None;
            }
        };
        let ticket = self.messages.revalidate(chat_id.clone());
        let data = Arc::clone(&self.data);
        let messages = Arc::clone(&self.messages);
        let registry = Arc::clone(&self.registry);
        let chat_id = chat_id.clone();

        Some(runtime.spawn(async move {
            let refreshed = async {
                data.invalidate_workspace_messages(&chat_id).await?;
                data.fetch_workspace_messages(&chat_id).await
            }
            .await;
            match refreshed {
                Ok(list) => {
                    let ids: Vec<String> = list.iter().map(|m| m.id.clone()).collect();
                    if messages.resolve(&ticket, list) {
                        let synced = registry.mark_synced(&chat_id, &ids);
                        tracing::debug!(chat = %chat_id, messages = ids.len(), synced, "workspace messages refreshed");
                    }
                    Ok(())
                }
                Err(e) => {
                    messages.fail(&ticket);
                    tracing::error!(chat = %chat_id, "message refresh failed: {e:#}");
                    Err(e.context(format!("failed to refresh messages for {chat_id}")))
                }
            }
        }))
    }

    /// Apply tab modes once per workspace load, after its metadata arrived.
    pub fn initialize_modes(&self, chat_id: &ChatId, metas: &[SubChatMeta]) -> bool {
        self.modes.initialize(chat_id, metas, |meta| {
            self.tabs.lock().set_mode(chat_id, &meta.id, meta.mode);
        })
    }

    /// What the message list should render right now.
    pub fn displayed_messages(&self) -> Snapshot<ChatId, Vec<WorkspaceMessage>> {
        self.messages.snapshot()
    }

    // -- shell -----------------------------------------------------------------

    pub fn sidebar_open(&self) -> bool {
        self.sidebar_open.load(Ordering::SeqCst)
    }

    /// Returns the new state.
    pub fn toggle_sidebar(&self) -> bool {
        !self.sidebar_open.fetch_xor(true, Ordering::SeqCst)
    }

    /// Resolve a key event and offer it to installed listeners. The built-in
    /// action runs only when no listener handled it. Returns the action that
    /// was handled, if any.
    pub async fn handle_shortcut(&self, event: &KeyEvent) -> anyhow::Result<Option<ShortcutAction>> {
        let Some(action) = self.shortcuts.profile().resolve(event) else {
            return Ok(None);
        };
        if self.shortcuts.dispatch(event) {
            tracing::debug!(?action, "shortcut handled by listener");
            return Ok(Some(action));
        }

        let workspace = self.current_workspace();
        let needs_workspace = matches!(
            action,
            ShortcutAction::NewTab | ShortcutAction::CloseTab | ShortcutAction::PrevTab | ShortcutAction::NextTab
        );
        if needs_workspace && workspace.is_none() {
            self.noop(format!("shortcut {action:?} ignored: no workspace selected"));
            return Ok(None);
        }

        match (action, workspace) {
            (ShortcutAction::NewTab, Some(chat_id)) => {
                self.new_tab(&chat_id, ChatMode::default()).await?;
            }
            (ShortcutAction::CloseTab, Some(chat_id)) => {
                let has_selection = !self.tabs.lock().selected(&chat_id).is_empty();
                if has_selection {
                    self.close_selected_tabs(&chat_id);
                } else if let Some(active) = self.active_tab(&chat_id) {
                    self.close_tab(&chat_id, &active);
                }
            }
            (ShortcutAction::PrevTab, Some(chat_id)) => {
                self.cycle_tab(&chat_id, CycleDirection::Prev);
            }
            (ShortcutAction::NextTab, Some(chat_id)) => {
                self.cycle_tab(&chat_id, CycleDirection::Next);
            }
            (ShortcutAction::ToggleSidebar, _) => {
                self.toggle_sidebar();
            }
            (ShortcutAction::RestoreArchivedWorkspace, _) => {
                self.restore_archived_workspace().await?;
            }
            (ShortcutAction::Undo, _) => {
                self.undo_last().await?;
            }
            _ => return Ok(None),
        }
        Ok(Some(action))
    }
}

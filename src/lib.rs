//! Multi-pane chat coordination core.
//!
//! Tracks which chat panes are mounted and which one receives input, routes
//! sends and stops to it, manages per-workspace tabs with an undoable close,
//! and refreshes workspace data on switch without an empty-state flash.
//! `ChatCoordinator` bundles all of it behind one injectable container.

pub mod active;
pub mod app_logger;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod dispatch;
pub mod layout_store;
pub mod registry;
pub mod scheduler;
pub mod shortcuts;
pub mod swr;
pub mod tabs;
pub mod target;
pub mod undo;
pub mod workspace_switch;

pub use active::ActiveTargetSelector;
pub use app_logger::{init_tracing, DiagnosticsLog, LogEntry, LogLevel};
pub use config::CoordinatorConfig;
pub use coordinator::ChatCoordinator;
pub use data::{ChatDataSource, WorkspaceMessage};
pub use dispatch::{DispatchGate, DispatchOutcome, SkipReason};
pub use layout_store::{JsonFileStore, KeyValueStore, MemoryStore, TabLayout, TabLayoutStore};
pub use registry::{PaneSession, RegisteredPane, RegistrationHandle, TargetRegistry};
pub use scheduler::{ManualScheduler, Scheduler, TimerId, TokioScheduler};
pub use shortcuts::{Host, Key, KeyEvent, KeyProfile, ListenerGuard, Modifiers, Os, ShortcutAction, ShortcutDispatcher};
pub use swr::{RefreshTicket, Revalidating, Snapshot};
pub use tabs::{CloseOutcome, CloseRefusal, CycleDirection, SubChatMeta, TabLifecycleManager, WorkspaceTabs};
pub use target::{
    ChatId, ChatMode, ChatPane, ChatTarget, InstanceId, OutgoingMessage, PaneRegistration, PaneStatus, Readiness,
    SubChatId,
};
pub use undo::{UndoItem, UndoRecord, UndoStack, DEFAULT_UNDO_WINDOW};
pub use workspace_switch::{ModeInitializer, SwitchPlan, WorkspaceSwitchCoordinator};

/// Load the config from disk and install logging with its filter.
/// `CHATDECK_LOG` takes precedence over the configured filter.
pub fn init() -> CoordinatorConfig {
    let config = CoordinatorConfig::load();
    init_tracing(&config.log_filter);
    config
}

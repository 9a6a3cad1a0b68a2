//! Reversible-delete stack shared by tab close and workspace archive.
//!
//! Strictly LIFO: the undo gesture only ever reaches the most recently
//! pushed entry that hasn't expired. Each entry owns a timer; expiry drops
//! the entry without reversing anything, undo cancels the timer and hands
//! the item back so the caller can reverse it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::scheduler::{Scheduler, TimerId};
use crate::target::{ChatId, SubChatId};

/// How long a destructive action stays undoable.
pub const DEFAULT_UNDO_WINDOW: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UndoItem {
    /// An archived workspace.
    Workspace {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
    },
    /// A closed tab.
    #[serde(rename = "subchat")]
    SubChat {
        #[serde(rename = "subChatId")]
        sub_chat_id: SubChatId,
        #[serde(rename = "chatId")]
        chat_id: ChatId,
    },
}

impl UndoItem {
    pub fn workspace(chat_id: impl Into<ChatId>) -> Self {
        UndoItem::Workspace { chat_id: chat_id.into() }
    }

    pub fn sub_chat(chat_id: impl Into<ChatId>, sub_chat_id: impl Into<SubChatId>) -> Self {
        UndoItem::SubChat {
            sub_chat_id: sub_chat_id.into(),
            chat_id: chat_id.into(),
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        match self {
            UndoItem::Workspace { chat_id } | UndoItem::SubChat { chat_id, .. } => chat_id,
        }
    }
}

/// An item on the stack together with its pending expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoRecord {
    pub item: UndoItem,
    pub timer: TimerId,
}

struct Entry {
    token: u64,
    record: UndoRecord,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    next_token: u64,
}

pub struct UndoStack {
    inner: Arc<Mutex<Inner>>,
    scheduler: Arc<dyn Scheduler>,
    window: Duration,
}

impl UndoStack {
    pub fn new(scheduler: Arc<dyn Scheduler>, window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            scheduler,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Push an item and arm its expiry.
    ///
    /// Pushing an item equal to one already on the stack retires the older
    /// entry first (timer cancelled), so only one live timer exists per item.
    pub fn push(&self, item: UndoItem) -> UndoRecord {
        self.retire(&item);

        // Scheduling happens under the stack lock so an expiry can never run
        // before its entry exists. Expiry tasks take the lock only when fired.
        let mut inner = self.inner.lock();
        inner.next_token += 1;
        let token = inner.next_token;

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let expired_item = item.clone();
        let timer = self.scheduler.schedule(
            self.window,
            Box::new(move || {
                let Some(inner) = weak.upgrade() else { return };
                let mut inner = inner.lock();
                let before = inner.entries.len();
                inner.entries.retain(|e| e.token != token);
                if inner.entries.len() != before {
                    tracing::debug!(item = ?expired_item, "undo window expired");
                }
            }),
        );

        let record = UndoRecord { item, timer };
        inner.entries.push(Entry {
            token,
            record: record.clone(),
        });
        tracing::debug!(item = ?record.item, "pushed undo item");
        record
    }

    /// Pop the most recent live item and cancel its expiry. The caller
    /// performs the type-specific reversal.
    pub fn undo_last(&self) -> Option<UndoItem> {
        let entry = self.inner.lock().entries.pop()?;
        self.scheduler.cancel(entry.record.timer);
        tracing::debug!(item = ?entry.record.item, "undo");
        Some(entry.record.item)
    }

    /// Drop a specific item without reversing it, e.g. when the same action
    /// was reversed through another path.
    pub fn retire(&self, item: &UndoItem) -> bool {
        let removed: Vec<TimerId> = {
            let mut inner = self.inner.lock();
            let mut removed = Vec::new();
            inner.entries.retain(|e| {
                if &e.record.item == item {
                    removed.push(e.record.timer);
                    false
                } else {
                    true
                }
            });
            removed
        };
        for timer in &removed {
            self.scheduler.cancel(*timer);
        }
        !removed.is_empty()
    }

    pub fn peek(&self) -> Option<UndoItem> {
        self.inner.lock().entries.last().map(|e| e.record.item.clone())
    }

    /// Items oldest first.
    pub fn items(&self) -> Vec<UndoItem> {
        self.inner.lock().entries.iter().map(|e| e.record.item.clone()).collect()
    }

    /// Records oldest first.
    pub fn records(&self) -> Vec<UndoRecord> {
        self.inner.lock().entries.iter().map(|e| e.record.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every item and cancel every pending expiry.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut self.inner.lock().entries);
        for entry in drained {
            self.scheduler.cancel(entry.record.timer);
        }
    }
}

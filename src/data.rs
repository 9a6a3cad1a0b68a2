//! Data-layer collaborator.
//!
//! Chat content is persisted elsewhere. This layer only asks for archive and
//! restore, creates tabs, and invalidates/refetches a workspace's messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tabs::SubChatMeta;
use crate::target::{ChatId, ChatMode, SubChatId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMessage {
    pub id: String,
    pub sub_chat_id: SubChatId,
    pub role: String,
    pub content: String,
}

#[async_trait]
pub trait ChatDataSource: Send + Sync {
    async fn archive_workspace(&self, chat_id: &ChatId) -> anyhow::Result<()>;

    async fn restore_workspace(&self, chat_id: &ChatId) -> anyhow::Result<()>;

    async fn create_sub_chat(&self, chat_id: &ChatId, mode: ChatMode) -> anyhow::Result<SubChatMeta>;

    /// Mark cached message queries for the workspace stale. Must not evict.
    async fn invalidate_workspace_messages(&self, chat_id: &ChatId) -> anyhow::Result<()>;

    async fn fetch_workspace_messages(&self, chat_id: &ChatId) -> anyhow::Result<Vec<WorkspaceMessage>>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Data source double. Fetches can be held back to observe the
    /// in-between state of a workspace switch.
    #[derive(Default)]
    pub(crate) struct FakeDataSource {
        pub(crate) messages: Mutex<HashMap<ChatId, Vec<WorkspaceMessage>>>,
        pub(crate) archived: Mutex<Vec<ChatId>>,
        pub(crate) restored: Mutex<Vec<ChatId>>,
        pub(crate) invalidated: Mutex<Vec<ChatId>>,
        pub(crate) fail_fetches: AtomicBool,
        pub(crate) fail_restores: AtomicBool,
        hold_fetches: AtomicBool,
        release: Notify,
        created: AtomicUsize,
    }

    impl FakeDataSource {
        pub(crate) fn with_messages(entries: &[(&str, &[&str])]) -> Self {
            let source = Self::default();
            {
                let mut messages = source.messages.lock();
                for (chat, ids) in entries {
                    let list = ids
                        .iter()
                        .map(|id| WorkspaceMessage {
                            id: id.to_string(),
                            sub_chat_id: SubChatId::new("main"),
                            role: "user".to_string(),
                            content: format!("message {id}"),
                        })
                        .collect();
                    messages.insert(ChatId::new(*chat), list);
                }
            }
            source
        }

        pub(crate) fn hold(&self) {
            self.hold_fetches.store(true, Ordering::SeqCst);
        }

        pub(crate) fn release(&self) {
            self.hold_fetches.store(false, Ordering::SeqCst);
            self.release.notify_one();
        }
    }

    #[async_trait]
    impl ChatDataSource for FakeDataSource {
        async fn archive_workspace(&self, chat_id: &ChatId) -> anyhow::Result<()> {
            self.archived.lock().push(chat_id.clone());
            Ok(())
        }

        async fn restore_workspace(&self, chat_id: &ChatId) -> anyhow::Result<()> {
            if self.fail_restores.load(Ordering::SeqCst) {
                anyhow::bail!("restore rejected for {chat_id}");
            }
            self.archived.lock().retain(|c| c != chat_id);
            self.restored.lock().push(chat_id.clone());
            Ok(())
        }

        async fn create_sub_chat(&self, _chat_id: &ChatId, mode: ChatMode) -> anyhow::Result<SubChatMeta> {
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SubChatMeta {
                id: SubChatId::new(format!("new-{n}")),
                name: format!("New Chat {n}"),
                mode,
            })
        }

        async fn invalidate_workspace_messages(&self, chat_id: &ChatId) -> anyhow::Result<()> {
            self.invalidated.lock().push(chat_id.clone());
            Ok(())
        }

        async fn fetch_workspace_messages(&self, chat_id: &ChatId) -> anyhow::Result<Vec<WorkspaceMessage>> {
            if self.hold_fetches.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            if self.fail_fetches.load(Ordering::SeqCst) {
                anyhow::bail!("fetch failed for {chat_id}");
            }
            Ok(self.messages.lock().get(chat_id).cloned().unwrap_or_default())
        }
    }
}

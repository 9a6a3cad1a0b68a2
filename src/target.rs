//! Routing identity and capabilities of a mounted chat pane.
//!
//! Nothing in here interprets the routing metadata. The coordination layer
//! only compares identities and invokes the capabilities a pane hands over.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Workspace identifier (the top-level chat).
    ChatId
);
string_id!(
    /// Tab identifier within a workspace.
    SubChatId
);
string_id!(
    /// Stable identity of one mounted pane.
    InstanceId
);

impl InstanceId {
    /// Identity used when a pane registers without an explicit id.
    pub fn derive(chat_id: &ChatId, sub_chat_id: &SubChatId) -> Self {
        Self(format!("{chat_id}:{sub_chat_id}"))
    }
}

/// Routing metadata carried by a registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTarget {
    pub chat_id: ChatId,
    pub sub_chat_id: SubChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl ChatTarget {
    pub fn new(chat_id: impl Into<ChatId>, sub_chat_id: impl Into<SubChatId>) -> Self {
        Self {
            chat_id: chat_id.into(),
            sub_chat_id: sub_chat_id.into(),
            project_path: None,
            worktree_path: None,
            sandbox_id: None,
            team_id: None,
        }
    }

    /// Only `chat_id` and `sub_chat_id` define identity; paths and ids are extras.
    pub fn same_identity(&self, other: &ChatTarget) -> bool {
        self.chat_id == other.chat_id && self.sub_chat_id == other.sub_chat_id
    }
}

/// Whether a pane can accept a send right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Ready,
    #[default]
    Pending,
    Loading,
    Error,
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Readiness::Ready => "ready",
            Readiness::Pending => "pending",
            Readiness::Loading => "loading",
            Readiness::Error => "error",
        };
        f.write_str(label)
    }
}

/// Non-identity flags a pane keeps updating while mounted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaneStatus {
    pub is_streaming: bool,
    pub is_archived: bool,
    pub readiness: Readiness,
}

impl PaneStatus {
    pub fn ready() -> Self {
        Self {
            readiness: Readiness::Ready,
            ..Self::default()
        }
    }
}

/// Conversation mode of a tab
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Plan,
    #[default]
    Agent,
}

/// Message payload routed to a pane. Opaque to this layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ChatMode>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: None,
        }
    }
}

/// Capabilities owned by a mounted pane.
///
/// The send/stop pipeline lives behind the pane; this layer only calls it.
/// The UI affordances default to no-ops for panes that don't expose them.
#[async_trait]
pub trait ChatPane: Send + Sync {
    async fn send_message(&self, message: OutgoingMessage) -> anyhow::Result<()>;

    async fn stop_stream(&self) -> anyhow::Result<()>;

    /// Whether the pane supports stopping a stream at all.
    fn can_stop(&self) -> bool {
        true
    }

    fn focus_editor(&self) {}

    fn scroll_to_bottom(&self) {}

    fn is_auto_scroll(&self) -> bool {
        true
    }
}

/// What a pane hands over when it mounts.
#[derive(Clone)]
pub struct PaneRegistration {
    /// Explicit identity; derived from the target when absent.
    pub instance_id: Option<InstanceId>,
    pub target: ChatTarget,
    pub pane: Arc<dyn ChatPane>,
    pub status: PaneStatus,
}

impl PaneRegistration {
    pub fn new(target: ChatTarget, pane: Arc<dyn ChatPane>) -> Self {
        Self {
            instance_id: None,
            target,
            pane,
            status: PaneStatus::default(),
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<InstanceId>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_status(mut self, status: PaneStatus) -> Self {
        self.status = status;
        self
    }

    pub fn resolved_instance_id(&self) -> InstanceId {
        self.instance_id
            .clone()
            .unwrap_or_else(|| InstanceId::derive(&self.target.chat_id, &self.target.sub_chat_id))
    }
}

impl fmt::Debug for PaneRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaneRegistration")
            .field("instance_id", &self.resolved_instance_id())
            .field("target", &self.target)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

use serde::{Deserialize, Serialize};

/// Real-time events published after a successful write.
/// Payloads only carry identifiers; subscribers re-read what they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    MessageCreated { conversation_id: i64, message_id: i64 },
    MessageUpdated { conversation_id: i64, message_id: i64 },
    MessageSeen { conversation_id: i64, message_id: i64 },
    MessageUnseen { conversation_id: i64, message_id: i64 },
    MessageLiked { conversation_id: i64, message_id: i64 },
    MessagePinned { conversation_id: i64, message_id: i64 },
    MessageDeleted { conversation_id: i64, message_id: i64 },
}

impl ChatEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message-created",
            Self::MessageUpdated { .. } => "message-updated",
            Self::MessageSeen { .. } => "message-seen",
            Self::MessageUnseen { .. } => "message-unseen",
            Self::MessageLiked { .. } => "message-liked",
            Self::MessagePinned { .. } => "message-pinned",
            Self::MessageDeleted { .. } => "message-deleted",
        }
    }

    pub fn conversation_id(&self) -> i64 {
        match *self {
            Self::MessageCreated { conversation_id, .. }
            | Self::MessageUpdated { conversation_id, .. }
            | Self::MessageSeen { conversation_id, .. }
            | Self::MessageUnseen { conversation_id, .. }
            | Self::MessageLiked { conversation_id, .. }
            | Self::MessagePinned { conversation_id, .. }
            | Self::MessageDeleted { conversation_id, .. } => conversation_id,
        }
    }

    pub fn message_id(&self) -> i64 {
        match *self {
            Self::MessageCreated { message_id, .. }
            | Self::MessageUpdated { message_id, .. }
            | Self::MessageSeen { message_id, .. }
            | Self::MessageUnseen { message_id, .. }
            | Self::MessageLiked { message_id, .. }
            | Self::MessagePinned { message_id, .. }
            | Self::MessageDeleted { message_id, .. } => message_id,
        }
    }

    /// Channel every event of a conversation is published on.
    pub fn channel(&self) -> String {
        conversation_channel(self.conversation_id())
    }
}

pub fn conversation_channel(conversation_id: i64) -> String {
    format!("conversation.{}", conversation_id)
}

/// Fan-out sink for chat events. Implementations must not block the caller.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, channel: &str, event: ChatEvent);
}

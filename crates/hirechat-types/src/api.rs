use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Attachment, Conversation, Job, Message, MessageStatus, User};

// -- Requests --

/// A file as handed over by the transport layer: display name plus
/// base64 content (a `data:` URL prefix is accepted).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadedFile {
    pub name: String,
    pub file: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageFilters {
    pub search: Option<String>,
    #[serde(default)]
    pub pinned_only: bool,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_per_page")]
    pub limit: u32,
}

fn default_per_page() -> u32 {
    50
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { offset: 0, limit: default_per_page() }
    }
}

// -- Responses --

#[derive(Debug, Clone, Serialize)]
pub struct AuthorView {
    pub id: i64,
    pub name: String,
}

impl From<&User> for AuthorView {
    fn from(user: &User) -> Self {
        Self { id: user.id, name: user.name.clone() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyView {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub user_id: i64,
    pub date: DateTime<Utc>,
}

impl From<&Message> for ReplyView {
    fn from(reply: &Message) -> Self {
        Self {
            id: reply.id,
            message: if reply.is_deleted() { None } else { reply.body.clone() },
            user_id: reply.author_id,
            date: reply.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentView {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub size: i64,
}

impl From<&Attachment> for AttachmentView {
    fn from(a: &Attachment) -> Self {
        Self {
            id: a.id,
            name: a.alias.clone(),
            url: a.url.clone(),
            size: a.size,
        }
    }
}

/// Fields withheld once a message is soft-deleted.
#[derive(Debug, Clone, Serialize)]
pub struct MessageContent {
    pub message: Option<String>,
    pub edited_message: Option<String>,
    pub status: MessageStatus,
    pub like_one: bool,
    pub like_two: bool,
    pub pin_one: bool,
    pub pin_two: bool,
    pub attachments: Vec<AttachmentView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub conversation_id: i64,
    pub is_seen: bool,
    pub seen_at: Option<DateTime<Utc>>,
    pub date: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub user: Option<AuthorView>,
    pub reply_to: Option<ReplyView>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
}

impl MessageView {
    pub fn new(
        message: &Message,
        author: Option<&User>,
        reply_to: Option<&Message>,
        attachments: &[Attachment],
    ) -> Self {
        let content = (!message.is_deleted()).then(|| MessageContent {
            message: message.body.clone(),
            edited_message: message.edited_body.clone(),
            status: message.status,
            like_one: message.like_one,
            like_two: message.like_two,
            pin_one: message.pin_one,
            pin_two: message.pin_two,
            attachments: attachments.iter().map(AttachmentView::from).collect(),
        });

        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            is_seen: message.is_seen,
            seen_at: message.seen_at,
            date: message.created_at,
            deleted_at: message.deleted_at,
            user: author.map(AuthorView::from),
            reply_to: reply_to.map(ReplyView::from),
            content,
        }
    }
}

/// One deduplicated entry of the staff notification feed.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationView {
    pub key: String,
    pub message: MessageView,
    pub conversation: Conversation,
    pub job: Option<Job>,
    pub hire_manager_id: Option<i64>,
}

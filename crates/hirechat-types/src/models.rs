use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
}

/// A fixed two-party conversation. Participant two is the freelancer seat,
/// participant one the client seat. Membership never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub participant_one_id: i64,
    pub participant_two_id: i64,
    pub job_id: Option<i64>,
    pub pin_one: bool,
    pub pin_two: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: i64) -> bool {
        user_id == self.participant_one_id || user_id == self.participant_two_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Original,
    Edited,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Edited => "edited",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "original" => Some(Self::Original),
            "edited" => Some(Self::Edited),
            _ => None,
        }
    }
}

/// Storage position of a per-message like/pin flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    One,
    Two,
}

/// Slot a like or pin lands in. Keyed on whether the actor wrote the message,
/// not on the conversation seat the actor holds.
pub fn reaction_slot(actor_is_author: bool) -> Slot {
    if actor_is_author { Slot::One } else { Slot::Two }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub author_id: i64,
    pub body: Option<String>,
    pub edited_body: Option<String>,
    pub reply_to_id: Option<i64>,
    pub status: MessageStatus,
    pub is_seen: bool,
    pub seen_at: Option<DateTime<Utc>>,
    pub like_one: bool,
    pub like_two: bool,
    pub pin_one: bool,
    pub pin_two: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub alias: String,
    pub url: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub title: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Hire-manager assignment statuses that make an admin responsible for a job.
pub const HIRE_MANAGER_ACTIVE: &str = "active";
pub const HIRE_MANAGER_PAUSED_ACTIVE: &str = "paused_active";

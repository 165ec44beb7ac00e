//! Composite rows returned by multi-table queries.

use chrono::{DateTime, Utc};
use hirechat_types::models::{Conversation, Job, Message, User};

/// One candidate selected for the staff notification feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRow {
    pub message_id: i64,
    pub conversation_id: i64,
    pub updated_at: DateTime<Utc>,
}

/// A message re-read together with its author, conversation and job.
#[derive(Debug, Clone)]
pub struct MessageDetail {
    pub message: Message,
    pub author: Option<User>,
    pub conversation: Conversation,
    pub job: Option<Job>,
}

/// Insert payload for a new message.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub conversation_id: i64,
    pub author_id: i64,
    pub body: Option<&'a str>,
    pub reply_to_id: Option<i64>,
}

/// Insert payload for attachment metadata.
#[derive(Debug, Clone)]
pub struct NewAttachment<'a> {
    pub message_id: i64,
    pub filename: &'a str,
    pub alias: &'a str,
    pub url: &'a str,
    pub size: i64,
}

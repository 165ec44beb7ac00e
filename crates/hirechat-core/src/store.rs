use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use hirechat_db::Database;
use hirechat_db::models::NewMessage;
use hirechat_types::api::{MessageFilters, MessageView, PageRequest};
use hirechat_types::filters::Page;
use hirechat_types::models::{Message, Slot, reaction_slot};

use crate::error::{ChatError, ChatResult};
use crate::guard::ParticipantGuard;

/// How long after creation the author may still edit a message.
pub const EDIT_WINDOW_MINUTES: i64 = 10;

/// Slot an actor's like or pin is written to.
pub fn slot_for(actor_id: i64, message: &Message) -> Slot {
    reaction_slot(actor_id == message.author_id)
}

/// Message CRUD and state transitions. Every mutation checks the actor
/// against the owning conversation first.
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        conversation_id: i64,
        author_id: i64,
        body: Option<&str>,
        reply_to_id: Option<i64>,
    ) -> ChatResult<Message> {
        ParticipantGuard::new(&*self.db).authorize(conversation_id, author_id)?;

        if let Some(reply_to_id) = reply_to_id {
            let target = self.db.get_message(reply_to_id)?.ok_or_else(|| {
                ChatError::InvalidReference(format!("reply target {} does not exist", reply_to_id))
            })?;
            if target.conversation_id != conversation_id {
                return Err(ChatError::InvalidReference(format!(
                    "reply target {} belongs to conversation {}",
                    reply_to_id, target.conversation_id
                )));
            }
        }

        let message = self.db.insert_message(
            &NewMessage {
                conversation_id,
                author_id,
                body,
                reply_to_id,
            },
            Utc::now(),
        )?;
        info!("Message {} created in conversation {} by {}", message.id, conversation_id, author_id);
        Ok(message)
    }

    pub fn update(&self, message_id: i64, actor_id: i64, new_body: &str) -> ChatResult<Message> {
        self.update_at(message_id, actor_id, new_body, Utc::now())
    }

    /// Edit evaluated against an explicit wall-clock instant.
    pub fn update_at(
        &self,
        message_id: i64,
        actor_id: i64,
        new_body: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<Message> {
        self.check_editable(message_id, actor_id, now)?;
        Ok(self.db.edit_message(message_id, new_body, now)?)
    }

    /// The checks `update_at` runs before writing: live message, author only,
    /// inside the edit window at `now`.
    pub fn check_editable(&self, message_id: i64, actor_id: i64, now: DateTime<Utc>) -> ChatResult<Message> {
        let message = self.load_live(message_id, actor_id)?;
        if message.author_id != actor_id {
            return Err(ChatError::AccessDenied);
        }
        if now - message.created_at > Duration::minutes(EDIT_WINDOW_MINUTES) {
            return Err(ChatError::EditWindowExpired);
        }
        Ok(message)
    }

    pub fn mark_seen(&self, message_id: i64, actor_id: i64) -> ChatResult<Message> {
        let now = Utc::now();
        self.set_seen(message_id, actor_id, Some(now), now)
    }

    pub fn mark_unseen(&self, message_id: i64, actor_id: i64) -> ChatResult<Message> {
        self.set_seen(message_id, actor_id, None, Utc::now())
    }

    pub fn like(&self, message_id: i64, actor_id: i64, value: bool) -> ChatResult<Message> {
        let message = self.load_live(message_id, actor_id)?;
        let slot = slot_for(actor_id, &message);
        debug!("Like {:?}={} on message {} by {}", slot, value, message_id, actor_id);
        Ok(self.db.set_like(message_id, slot, value, Utc::now())?)
    }

    pub fn pin(&self, message_id: i64, actor_id: i64, value: bool) -> ChatResult<Message> {
        let message = self.load_live(message_id, actor_id)?;
        let slot = slot_for(actor_id, &message);
        debug!("Pin {:?}={} on message {} by {}", slot, value, message_id, actor_id);
        Ok(self.db.set_pin(message_id, slot, value, Utc::now())?)
    }

    /// Soft-delete. Deleting an already deleted message succeeds without change.
    /// Returns the message as stored afterwards.
    pub fn delete(&self, message_id: i64, actor_id: i64) -> ChatResult<Message> {
        let message = self
            .db
            .get_message(message_id)?
            .ok_or_else(|| ChatError::message_not_found(message_id))?;
        if message.author_id != actor_id {
            return Err(ChatError::AccessDenied);
        }
        if message.is_deleted() {
            return Ok(message);
        }

        if self.db.soft_delete_message(message_id, Utc::now())? {
            info!("Message {} soft-deleted by {}", message_id, actor_id);
        }
        self.db
            .get_message(message_id)?
            .ok_or_else(|| ChatError::message_not_found(message_id))
    }

    pub fn list_by_conversation(
        &self,
        conversation_id: i64,
        requester_id: i64,
        filters: &MessageFilters,
        page: PageRequest,
    ) -> ChatResult<Page<Message>> {
        ParticipantGuard::new(&*self.db).authorize(conversation_id, requester_id)?;
        Ok(self.db.list_messages(conversation_id, requester_id, filters, page)?)
    }

    /// Unseen messages waiting for `user_id` across all their conversations.
    pub fn unread_total(&self, user_id: i64) -> ChatResult<u64> {
        Ok(self.db.count_unread_for_user(user_id)?)
    }

    /// External representation with authors, reply targets and attachments.
    pub fn present(&self, messages: &[Message]) -> ChatResult<Vec<MessageView>> {
        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        let mut attachments: HashMap<i64, Vec<_>> = HashMap::new();
        for attachment in self.db.get_attachments_for_messages(&ids)? {
            attachments.entry(attachment.message_id).or_default().push(attachment);
        }

        let reply_ids: Vec<i64> = messages
            .iter()
            .filter_map(|m| m.reply_to_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let replies: HashMap<i64, Message> = self
            .db
            .get_messages_by_ids(&reply_ids)?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let mut authors = HashMap::new();
        for author_id in messages.iter().map(|m| m.author_id) {
            if let std::collections::hash_map::Entry::Vacant(slot) = authors.entry(author_id) {
                slot.insert(self.db.get_user(author_id)?);
            }
        }

        Ok(messages
            .iter()
            .map(|m| {
                MessageView::new(
                    m,
                    authors.get(&m.author_id).and_then(Option::as_ref),
                    m.reply_to_id.and_then(|id| replies.get(&id)),
                    attachments.get(&m.id).map(Vec::as_slice).unwrap_or_default(),
                )
            })
            .collect())
    }

    fn set_seen(
        &self,
        message_id: i64,
        actor_id: i64,
        seen_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ChatResult<Message> {
        let message = self.load_live(message_id, actor_id)?;
        if message.author_id == actor_id {
            return Err(ChatError::SelfSeenNotAllowed);
        }
        Ok(self.db.set_seen(message_id, seen_at, now)?)
    }

    /// Load a non-deleted message and authorize the actor on its conversation.
    fn load_live(&self, message_id: i64, actor_id: i64) -> ChatResult<Message> {
        let message = self
            .db
            .get_message(message_id)?
            .filter(|m| !m.is_deleted())
            .ok_or_else(|| ChatError::message_not_found(message_id))?;
        ParticipantGuard::new(&*self.db).authorize(message.conversation_id, actor_id)?;
        Ok(message)
    }
}

use hirechat_db::Database;
use hirechat_types::models::Conversation;

use crate::error::{ChatError, ChatResult};

/// Read access to conversations, owned by the conversation-creation flow.
pub trait ConversationReader {
    fn find_conversation(&self, id: i64) -> anyhow::Result<Option<Conversation>>;
}

impl ConversationReader for Database {
    fn find_conversation(&self, id: i64) -> anyhow::Result<Option<Conversation>> {
        self.get_conversation(id)
    }
}

/// Fails with `AccessDenied` unless `user_id` holds one of the two seats.
pub fn assert_participant(conversation: &Conversation, user_id: i64) -> ChatResult<()> {
    if conversation.has_participant(user_id) {
        Ok(())
    } else {
        Err(ChatError::AccessDenied)
    }
}

pub struct ParticipantGuard<'a, R: ConversationReader> {
    reader: &'a R,
}

impl<'a, R: ConversationReader> ParticipantGuard<'a, R> {
    pub fn new(reader: &'a R) -> Self {
        Self { reader }
    }

    pub fn conversation(&self, conversation_id: i64) -> ChatResult<Conversation> {
        self.reader
            .find_conversation(conversation_id)?
            .ok_or_else(|| ChatError::conversation_not_found(conversation_id))
    }

    /// Load the conversation and check that `user_id` takes part in it.
    pub fn authorize(&self, conversation_id: i64, user_id: i64) -> ChatResult<Conversation> {
        let conversation = self.conversation(conversation_id)?;
        assert_participant(&conversation, user_id)?;
        Ok(conversation)
    }
}

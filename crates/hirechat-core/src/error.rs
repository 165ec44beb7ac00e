use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Typed failures of the chat core. The transport layer maps [`ChatError::code`]
/// to its own status codes; nothing here is meant for end users.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("actor is not allowed to act on this conversation or message")]
    AccessDenied,

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("edit window expired")]
    EditWindowExpired,

    #[error("participants cannot change the seen state of their own messages")]
    SelfSeenNotAllowed,

    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),

    #[error("attachment upload failed: {0}")]
    AttachmentUploadFailed(String),

    #[error("invalid filter combination: {0}")]
    InvalidFilterCombination(&'static str),

    #[error("repository failure: {0}")]
    RepositoryFailure(#[from] anyhow::Error),
}

impl ChatError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccessDenied => "access_denied",
            Self::NotFound { .. } => "not_found",
            Self::InvalidReference(_) => "invalid_reference",
            Self::EditWindowExpired => "edit_window_expired",
            Self::SelfSeenNotAllowed => "self_seen_not_allowed",
            Self::InvalidAttachment(_) => "invalid_attachment",
            Self::AttachmentUploadFailed(_) => "attachment_upload_failed",
            Self::InvalidFilterCombination(_) => "invalid_filter_combination",
            Self::RepositoryFailure(_) => "repository_failure",
        }
    }

    pub(crate) fn message_not_found(id: i64) -> Self {
        Self::NotFound { entity: "message", id }
    }

    pub(crate) fn conversation_not_found(id: i64) -> Self {
        Self::NotFound { entity: "conversation", id }
    }
}

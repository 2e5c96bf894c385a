use crate::backend::BackendError;
use crate::state::{AppError, OperationKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("unknown conversation {0}")]
    UnknownConversation(String),
    #[error("conversation {0} is closed")]
    ConversationClosed(String),
    #[error("message has no body and no attachments")]
    EmptyMessage,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub(crate) fn to_app_error(&self, op: OperationKind) -> AppError {
        AppError {
            op,
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

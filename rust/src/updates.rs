use crate::backend::{
    BackendError, CompletedJobDto, ConversationSummaryDto, CreateConversationResponse,
    MessageDto, SendMessageResponse, UnreadCountDto,
};
use crate::state::{AppState, ConversationKey};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
    /// Sent when the owning `ChatApp` is dropped; the actor stops polling and exits.
    Shutdown,
}

/// Results of async work spawned by the core, routed back onto the actor thread.
#[derive(Debug)]
pub enum InternalEvent {
    ConversationCreated {
        key: ConversationKey,
        result: Result<CreateConversationResponse, BackendError>,
    },
    MessageSendResult {
        conversation_id: String,
        message_id: String,
        result: Result<SendMessageResponse, BackendError>,
    },
    // `generation` identifies the polling subscription that issued the fetch.
    MessagesFetched {
        conversation_id: String,
        generation: u64,
        result: Result<Vec<MessageDto>, BackendError>,
    },
    ChatListFetched {
        token: u64,
        user_id: String,
        result: Result<ChatListPayload, BackendError>,
    },
}

/// The three feeds a chat-list refresh joins together.
#[derive(Debug, Clone)]
pub struct ChatListPayload {
    pub conversations: Vec<ConversationSummaryDto>,
    pub unread: Vec<UnreadCountDto>,
    pub completed: Vec<CompletedJobDto>,
}

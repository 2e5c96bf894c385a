use crate::state::AttachmentRef;

#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Conversations
    CreateConversation {
        job_id: String,
        homeowner_id: String,
        trader_id: String,
    },
    OpenConversation {
        conversation_id: String,
    },
    LeaveConversation,
    EndConversation {
        conversation_id: String,
    },

    // Messages
    SendMessage {
        conversation_id: String,
        sender_id: String,
        body: String,
        attachments: Vec<AttachmentRef>,
    },

    // Chat list
    RefreshChatList {
        auth_token: String,
        user_id: String,
    },

    // UI
    ClearError,
}

impl AppAction {
    /// Log-safe action tag (never includes message bodies or auth tokens).
    pub fn tag(&self) -> &'static str {
        match self {
            // Conversations
            AppAction::CreateConversation { .. } => "CreateConversation",
            AppAction::OpenConversation { .. } => "OpenConversation",
            AppAction::LeaveConversation => "LeaveConversation",
            AppAction::EndConversation { .. } => "EndConversation",

            // Messages
            AppAction::SendMessage { .. } => "SendMessage",

            // Chat list
            AppAction::RefreshChatList { .. } => "RefreshChatList",

            // UI
            AppAction::ClearError => "ClearError",
        }
    }
}

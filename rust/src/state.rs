#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub conversations: Vec<Conversation>,
    pub active_conversation_id: Option<String>,
    pub current_chat: Option<ChatViewState>,
    pub chat_list: ChatListState,
    pub busy: BusyState,
    pub error: Option<AppError>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            conversations: vec![],
            active_conversation_id: None,
            current_chat: None,
            chat_list: ChatListState::empty(),
            busy: BusyState::idle(),
            error: None,
        }
    }
}

#[derive(
    uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Closed,
}

impl ConversationStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Natural key of a conversation: one homeowner and one trader talking about one job.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub job_id: String,
    pub homeowner_id: String,
    pub trader_id: String,
}

impl ConversationKey {
    pub fn new(job_id: &str, homeowner_id: &str, trader_id: &str) -> Self {
        Self {
            job_id: job_id.trim().to_string(),
            homeowner_id: homeowner_id.trim().to_string(),
            trader_id: trader_id.trim().to_string(),
        }
    }

    /// Name of the first empty component, if any.
    pub fn first_empty_field(&self) -> Option<&'static str> {
        if self.job_id.is_empty() {
            Some("job_id")
        } else if self.homeowner_id.is_empty() {
            Some("homeowner_id")
        } else if self.trader_id.is_empty() {
            Some("trader_id")
        } else {
            None
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Conversation {
    pub id: String,
    pub job_id: String,
    pub homeowner_id: String,
    pub trader_id: String,
    pub status: ConversationStatus,
    pub created_at: i64,
}

impl Conversation {
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(&self.job_id, &self.homeowner_id, &self.trader_id)
    }

    /// The participant that is not `user_id`. Falls back to the trader when the viewer
    /// is neither party (e.g. an admin view).
    pub fn counterparty_of(&self, user_id: &str) -> &str {
        if self.trader_id == user_id {
            &self.homeowner_id
        } else {
            &self.trader_id
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub name: String,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: i64,
    pub attachments: Vec<AttachmentRef>,
    pub pending: bool,
}

/// "In flight" flags for operations the UI should reflect.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub creating_conversation: bool,
    pub loading_messages: bool,
    pub refreshing_chat_list: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            creating_conversation: false,
            loading_messages: false,
            refreshing_chat_list: false,
        }
    }

    pub(crate) fn set(&mut self, op: OperationKind, loading: bool) {
        match op {
            OperationKind::CreateConversation => self.creating_conversation = loading,
            OperationKind::LoadMessages => self.loading_messages = loading,
            OperationKind::ChatList => self.refreshing_chat_list = loading,
            OperationKind::SendMessage | OperationKind::Validation => {}
        }
    }
}

impl Default for BusyState {
    fn default() -> Self {
        Self::idle()
    }
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateConversation,
    SendMessage,
    LoadMessages,
    ChatList,
    Validation,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct AppError {
    pub op: OperationKind,
    pub message: String,
    /// Whether re-dispatching the same action may succeed.
    pub retryable: bool,
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct ChatViewState {
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,
    pub can_send: bool,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ChatSummary {
    pub conversation_id: String,
    pub job_id: String,
    pub counterparty_id: String,
    pub counterparty_name: Option<String>,
    pub status: ConversationStatus,
    pub created_at: i64,
    pub last_message: Option<String>,
    pub last_message_at: Option<i64>,
    pub message_count: u32,
    pub unread_count: u32,
    pub is_past: bool,
}

impl ChatSummary {
    /// Most recent activity: the last message, or creation when nothing was sent yet.
    pub fn activity_at(&self) -> i64 {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ChatListState {
    pub active: Vec<ChatSummary>,
    pub past: Vec<ChatSummary>,
    pub fetched_at: Option<i64>,
}

impl ChatListState {
    pub fn empty() -> Self {
        Self {
            active: vec![],
            past: vec![],
            fetched_at: None,
        }
    }

    pub fn total_unread(&self) -> u32 {
        self.active
            .iter()
            .chain(self.past.iter())
            .map(|c| c.unread_count)
            .sum()
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

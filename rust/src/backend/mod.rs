//! Collaborator contracts consumed by the core.
//!
//! Everything that crosses the network boundary is an explicit schema here, and every
//! response is validated before the core turns it into a reducer action.

mod faults;
mod http;
mod simulated;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::{AttachmentRef, ChatMessage, Conversation, ConversationStatus};

pub use faults::{FaultInjector, NeverFail, RandomFaults, ScriptedFaults};
pub use http::HttpBackend;
pub use simulated::SimulatedBackend;

pub type SharedBackend = Arc<dyn ChatBackend>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("backend returned {code}: {body}")]
    Status { code: u16, body: String },
    #[error("request timed out")]
    Timeout,
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl BackendError {
    /// Transient failures a caller may retry. Rejections and 4xx answers will not
    /// change on a second attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Status { code, .. } => *code >= 500 || *code == 408 || *code == 429,
            Self::Rejected(_) | Self::InvalidPayload(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    CreateConversation,
    SendMessage,
    ListMessages,
    ListConversations,
    UnreadSummary,
    CompletedJobs,
}

impl fmt::Display for BackendOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CreateConversation => "create_conversation",
            Self::SendMessage => "send_message",
            Self::ListMessages => "list_messages",
            Self::ListConversations => "list_conversations",
            Self::UnreadSummary => "unread_summary",
            Self::CompletedJobs => "completed_jobs",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Idempotent: an existing conversation for the same triple is returned as-is.
    async fn create_conversation(
        &self,
        req: CreateConversationRequest,
    ) -> Result<CreateConversationResponse, BackendError>;

    async fn send_message(
        &self,
        req: SendMessageRequest,
    ) -> Result<SendMessageResponse, BackendError>;

    /// Authoritative, ordered message list for one conversation.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageDto>, BackendError>;

    async fn list_conversations(
        &self,
        auth_token: &str,
    ) -> Result<Vec<ConversationSummaryDto>, BackendError>;

    async fn unread_summary(&self, auth_token: &str) -> Result<Vec<UnreadCountDto>, BackendError>;

    async fn completed_jobs(&self, auth_token: &str) -> Result<Vec<CompletedJobDto>, BackendError>;
}

/// Bound a backend call; an elapsed deadline is reported as [`BackendError::Timeout`].
pub async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(BackendError::Timeout),
    }
}

fn require(field: &str, value: &str) -> Result<(), BackendError> {
    if value.trim().is_empty() {
        return Err(BackendError::InvalidPayload(format!("{field} is empty")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub job_id: String,
    pub homeowner_id: String,
    pub trader_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationResponse {
    pub conversation_id: String,
    pub status: ConversationStatus,
    pub created_at: i64,
}

impl CreateConversationResponse {
    pub fn validate(&self) -> Result<(), BackendError> {
        require("conversationId", &self.conversation_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: String,
    /// Client-generated id; the backend must echo it so polls can be merged by id.
    pub message_id: String,
    pub sender_id: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment_refs: Vec<AttachmentRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message_id: String,
    pub created_at: i64,
}

impl SendMessageResponse {
    pub fn validate(&self) -> Result<(), BackendError> {
        require("messageId", &self.message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: i64,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

impl MessageDto {
    pub fn validate(&self, conversation_id: &str) -> Result<(), BackendError> {
        require("id", &self.id)?;
        require("senderId", &self.sender_id)?;
        if self.conversation_id != conversation_id {
            return Err(BackendError::InvalidPayload(format!(
                "message {} belongs to {}, expected {conversation_id}",
                self.id, self.conversation_id
            )));
        }
        Ok(())
    }

    /// Messages obtained from the backend are confirmed by definition.
    pub fn into_confirmed(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            body: self.body,
            created_at: self.created_at,
            attachments: self.attachments,
            pending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageDto {
    pub body: String,
    pub sender_id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummaryDto {
    pub conversation_id: String,
    pub job_id: String,
    pub homeowner_id: String,
    pub trader_id: String,
    pub status: ConversationStatus,
    pub created_at: i64,
    #[serde(default)]
    pub last_message: Option<LastMessageDto>,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub counterparty_name: Option<String>,
}

impl ConversationSummaryDto {
    pub fn validate(&self) -> Result<(), BackendError> {
        require("conversationId", &self.conversation_id)?;
        require("jobId", &self.job_id)?;
        require("homeownerId", &self.homeowner_id)?;
        require("traderId", &self.trader_id)
    }

    pub fn to_conversation(&self) -> Conversation {
        Conversation {
            id: self.conversation_id.clone(),
            job_id: self.job_id.clone(),
            homeowner_id: self.homeowner_id.clone(),
            trader_id: self.trader_id.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountDto {
    pub conversation_id: String,
    pub unread_count: u32,
}

/// One entry of the completed-jobs feed. Older feeds only carry the job and one of
/// the participants, so every other field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedJobDto {
    pub job_id: String,
    #[serde(default)]
    pub trader_id: Option<String>,
    #[serde(default)]
    pub homeowner_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl CompletedJobDto {
    pub fn validate(&self) -> Result<(), BackendError> {
        require("jobId", &self.job_id)
    }
}

/// Validate a fetched message list in one pass.
pub fn validate_messages(
    conversation_id: &str,
    messages: &[MessageDto],
) -> Result<(), BackendError> {
    messages.iter().try_for_each(|m| m.validate(conversation_id))
}

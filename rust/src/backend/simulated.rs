// In-memory stand-in for the conversation API, used offline and in tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    BackendError, BackendOp, ChatBackend, CompletedJobDto, ConversationSummaryDto,
    CreateConversationRequest, CreateConversationResponse, FaultInjector, LastMessageDto,
    MessageDto, NeverFail, SendMessageRequest, SendMessageResponse, UnreadCountDto,
};
use crate::state::{now_millis, Conversation, ConversationKey, ConversationStatus};

#[derive(Default)]
struct Tables {
    conversations: Vec<Conversation>,
    messages: HashMap<String, Vec<MessageDto>>,
    unread: HashMap<String, u32>,
    completed: Vec<CompletedJobDto>,
    names: HashMap<String, String>,
}

pub struct SimulatedBackend {
    tables: Mutex<Tables>,
    faults: Arc<dyn FaultInjector>,
    latency: Duration,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            faults: Arc::new(NeverFail),
            latency: Duration::ZERO,
        }
    }

    pub fn with_faults(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn enter(&self, op: BackendOp) -> Result<(), BackendError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.faults.should_fail(op) {
            tracing::debug!(%op, "simulated backend: injected failure");
            return Err(BackendError::Network(format!("simulated {op} failure")));
        }
        Ok(())
    }

    /// Append a message as if another participant had sent it.
    pub fn insert_message(&self, message: MessageDto) {
        let mut t = self.tables.lock();
        *t.unread.entry(message.conversation_id.clone()).or_default() += 1;
        t.messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    pub fn set_unread(&self, conversation_id: &str, count: u32) {
        self.tables
            .lock()
            .unread
            .insert(conversation_id.to_string(), count);
    }

    pub fn set_display_name(&self, user_id: &str, name: &str) {
        self.tables
            .lock()
            .names
            .insert(user_id.to_string(), name.to_string());
    }

    pub fn complete_job(&self, job: CompletedJobDto) {
        self.tables.lock().completed.push(job);
    }

    pub fn close_conversation(&self, conversation_id: &str) {
        let mut t = self.tables.lock();
        if let Some(c) = t
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            c.status = ConversationStatus::Closed;
        }
    }

    /// Register a conversation with a caller-chosen id (seeding fixtures).
    pub fn insert_conversation(&self, conversation: Conversation) {
        let mut t = self.tables.lock();
        t.messages.entry(conversation.id.clone()).or_default();
        t.conversations.push(conversation);
    }

    pub fn conversation_count(&self) -> usize {
        self.tables.lock().conversations.len()
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<MessageDto> {
        self.tables
            .lock()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatBackend for SimulatedBackend {
    async fn create_conversation(
        &self,
        req: CreateConversationRequest,
    ) -> Result<CreateConversationResponse, BackendError> {
        self.enter(BackendOp::CreateConversation).await?;
        let key = ConversationKey::new(&req.job_id, &req.homeowner_id, &req.trader_id);
        let mut t = self.tables.lock();
        if let Some(existing) = t.conversations.iter().find(|c| c.key() == key) {
            return Ok(CreateConversationResponse {
                conversation_id: existing.id.clone(),
                status: existing.status,
                created_at: existing.created_at,
            });
        }
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: key.job_id,
            homeowner_id: key.homeowner_id,
            trader_id: key.trader_id,
            status: ConversationStatus::Open,
            created_at: now_millis(),
        };
        let resp = CreateConversationResponse {
            conversation_id: conversation.id.clone(),
            status: conversation.status,
            created_at: conversation.created_at,
        };
        t.messages.entry(conversation.id.clone()).or_default();
        t.conversations.push(conversation);
        Ok(resp)
    }

    async fn send_message(
        &self,
        req: SendMessageRequest,
    ) -> Result<SendMessageResponse, BackendError> {
        self.enter(BackendOp::SendMessage).await?;
        let mut t = self.tables.lock();
        let Some(conversation) = t
            .conversations
            .iter()
            .find(|c| c.id == req.conversation_id)
        else {
            return Err(BackendError::Status {
                code: 404,
                body: format!("conversation {} not found", req.conversation_id),
            });
        };
        if conversation.status.is_closed() {
            return Err(BackendError::Rejected(format!(
                "conversation {} is closed",
                req.conversation_id
            )));
        }
        let list = t.messages.entry(req.conversation_id.clone()).or_default();
        // Retried sends carry the same client id; answer with the stored copy.
        if let Some(existing) = list.iter().find(|m| m.id == req.message_id) {
            return Ok(SendMessageResponse {
                message_id: existing.id.clone(),
                created_at: existing.created_at,
            });
        }
        let created_at = now_millis();
        list.push(MessageDto {
            id: req.message_id.clone(),
            conversation_id: req.conversation_id,
            sender_id: req.sender_id,
            body: req.body,
            created_at,
            attachments: req.attachment_refs,
        });
        Ok(SendMessageResponse {
            message_id: req.message_id,
            created_at,
        })
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageDto>, BackendError> {
        self.enter(BackendOp::ListMessages).await?;
        let t = self.tables.lock();
        if !t.conversations.iter().any(|c| c.id == conversation_id) {
            return Err(BackendError::Status {
                code: 404,
                body: format!("conversation {conversation_id} not found"),
            });
        }
        Ok(t.messages.get(conversation_id).cloned().unwrap_or_default())
    }

    async fn list_conversations(
        &self,
        auth_token: &str,
    ) -> Result<Vec<ConversationSummaryDto>, BackendError> {
        self.enter(BackendOp::ListConversations).await?;
        check_token(auth_token)?;
        let t = self.tables.lock();
        let summaries = t
            .conversations
            .iter()
            .map(|c| {
                let messages = t.messages.get(&c.id);
                let last_message = messages.and_then(|m| m.last()).map(|m| LastMessageDto {
                    body: m.body.clone(),
                    sender_id: m.sender_id.clone(),
                    created_at: m.created_at,
                });
                ConversationSummaryDto {
                    conversation_id: c.id.clone(),
                    job_id: c.job_id.clone(),
                    homeowner_id: c.homeowner_id.clone(),
                    trader_id: c.trader_id.clone(),
                    status: c.status,
                    created_at: c.created_at,
                    last_message,
                    message_count: messages.map_or(0, |m| m.len() as u32),
                    counterparty_name: t.names.get(&c.trader_id).cloned(),
                }
            })
            .collect();
        Ok(summaries)
    }

    async fn unread_summary(&self, auth_token: &str) -> Result<Vec<UnreadCountDto>, BackendError> {
        self.enter(BackendOp::UnreadSummary).await?;
        check_token(auth_token)?;
        let t = self.tables.lock();
        let mut out: Vec<UnreadCountDto> = t
            .unread
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, count)| UnreadCountDto {
                conversation_id: id.clone(),
                unread_count: *count,
            })
            .collect();
        out.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        Ok(out)
    }

    async fn completed_jobs(&self, auth_token: &str) -> Result<Vec<CompletedJobDto>, BackendError> {
        self.enter(BackendOp::CompletedJobs).await?;
        check_token(auth_token)?;
        Ok(self.tables.lock().completed.clone())
    }
}

fn check_token(auth_token: &str) -> Result<(), BackendError> {
    if auth_token.trim().is_empty() {
        return Err(BackendError::Status {
            code: 401,
            body: "missing bearer token".into(),
        });
    }
    Ok(())
}

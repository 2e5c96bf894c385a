use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use jobchat_core::backend::{
    BackendError, ChatBackend, CompletedJobDto, ConversationSummaryDto,
    CreateConversationRequest, CreateConversationResponse, FaultInjector, MessageDto,
    SendMessageRequest, SendMessageResponse, SimulatedBackend, UnreadCountDto,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Simulated backend whose calls can be held open until the test releases them.
///
/// Sends are gated by message body, message lists by conversation id. A send marked with
/// `lose_ack` is stored by the inner backend but answered with a network error once
/// released.
pub struct GatedBackend {
    pub inner: SimulatedBackend,
    send_gates: Mutex<HashMap<String, Arc<Notify>>>,
    lost_ack_gates: Mutex<HashMap<String, Arc<Notify>>>,
    list_gates: Mutex<HashMap<String, Arc<Notify>>>,
    chat_list_gate: Mutex<Option<Arc<Notify>>>,
    list_calls: Mutex<HashMap<String, usize>>,
    create_calls: AtomicUsize,
    chat_list_calls: AtomicUsize,
    lost_acks: AtomicUsize,
}

impl GatedBackend {
    pub fn new() -> Arc<Self> {
        Self::wrap(SimulatedBackend::new())
    }

    pub fn with_faults(faults: Arc<dyn FaultInjector>) -> Arc<Self> {
        Self::wrap(SimulatedBackend::new().with_faults(faults))
    }

    fn wrap(inner: SimulatedBackend) -> Arc<Self> {
        Arc::new(Self {
            inner,
            send_gates: Mutex::new(HashMap::new()),
            lost_ack_gates: Mutex::new(HashMap::new()),
            list_gates: Mutex::new(HashMap::new()),
            chat_list_gate: Mutex::new(None),
            list_calls: Mutex::new(HashMap::new()),
            create_calls: AtomicUsize::new(0),
            chat_list_calls: AtomicUsize::new(0),
            lost_acks: AtomicUsize::new(0),
        })
    }

    pub fn hold_send(&self, body: &str) {
        self.send_gates
            .lock()
            .insert(body.to_string(), Arc::new(Notify::new()));
    }

    pub fn release_send(&self, body: &str) {
        if let Some(gate) = self.send_gates.lock().remove(body) {
            gate.notify_one();
        }
    }

    pub fn lose_ack(&self, body: &str) {
        self.lost_ack_gates
            .lock()
            .insert(body.to_string(), Arc::new(Notify::new()));
    }

    pub fn release_lost_ack(&self, body: &str) {
        if let Some(gate) = self.lost_ack_gates.lock().remove(body) {
            gate.notify_one();
        }
    }

    /// Lost acks already answered with their error.
    pub fn lost_acks(&self) -> usize {
        self.lost_acks.load(Ordering::SeqCst)
    }

    pub fn hold_list(&self, conversation_id: &str) {
        self.list_gates
            .lock()
            .insert(conversation_id.to_string(), Arc::new(Notify::new()));
    }

    pub fn release_list(&self, conversation_id: &str) {
        if let Some(gate) = self.list_gates.lock().remove(conversation_id) {
            gate.notify_one();
        }
    }

    pub fn hold_chat_list(&self) {
        *self.chat_list_gate.lock() = Some(Arc::new(Notify::new()));
    }

    pub fn release_chat_list(&self) {
        if let Some(gate) = self.chat_list_gate.lock().take() {
            gate.notify_one();
        }
    }

    pub fn list_calls(&self, conversation_id: &str) -> usize {
        self.list_calls
            .lock()
            .get(conversation_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn chat_list_calls(&self) -> usize {
        self.chat_list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for GatedBackend {
    async fn create_conversation(
        &self,
        req: CreateConversationRequest,
    ) -> Result<CreateConversationResponse, BackendError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.create_conversation(req).await
    }

    async fn send_message(
        &self,
        req: SendMessageRequest,
    ) -> Result<SendMessageResponse, BackendError> {
        let gate = self.send_gates.lock().get(&req.body).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let lost = self.lost_ack_gates.lock().get(&req.body).cloned();
        if let Some(gate) = lost {
            self.inner.send_message(req).await?;
            gate.notified().await;
            self.lost_acks.fetch_add(1, Ordering::SeqCst);
            return Err(BackendError::Network("connection reset before ack".into()));
        }
        self.inner.send_message(req).await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageDto>, BackendError> {
        *self
            .list_calls
            .lock()
            .entry(conversation_id.to_string())
            .or_default() += 1;
        let gate = self.list_gates.lock().get(conversation_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.inner.list_messages(conversation_id).await
    }

    async fn list_conversations(
        &self,
        auth_token: &str,
    ) -> Result<Vec<ConversationSummaryDto>, BackendError> {
        self.chat_list_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.chat_list_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.inner.list_conversations(auth_token).await
    }

    async fn unread_summary(&self, auth_token: &str) -> Result<Vec<UnreadCountDto>, BackendError> {
        self.inner.unread_summary(auth_token).await
    }

    async fn completed_jobs(&self, auth_token: &str) -> Result<Vec<CompletedJobDto>, BackendError> {
        self.inner.completed_jobs(auth_token).await
    }
}

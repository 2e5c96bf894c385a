use crate::backend::{with_timeout, BackendError, CreateConversationRequest, CreateConversationResponse};
use crate::error::EngineError;
use crate::state::{Conversation, ConversationKey, OperationKind};
use crate::store::StoreAction;
use crate::updates::InternalEvent;

use super::AppCore;

impl AppCore {
    /// Opens the local conversation for `key`, creating it on the backend first when
    /// it is not known yet.
    pub(super) fn get_or_create_conversation(&mut self, key: ConversationKey) {
        if let Some(field) = key.first_empty_field() {
            let err = EngineError::EmptyField(field);
            tracing::warn!(%err, "create conversation rejected");
            self.set_error(OperationKind::Validation, &err);
            self.emit_state();
            return;
        }
        self.clear_error_for(OperationKind::Validation);

        if let Some(existing) = self.engine.conversations.find_by_key(&key) {
            let id = existing.id.clone();
            tracing::debug!(conversation_id = %id, "conversation found locally");
            self.open_conversation(&id);
            return;
        }

        if !self.creating.insert(key.clone()) {
            tracing::debug!(job_id = %key.job_id, "create already in flight; suppressed");
            return;
        }

        self.set_loading(OperationKind::CreateConversation, true);
        self.emit_state();

        let backend = self.backend.clone();
        let timeout = self.config.request_timeout();
        let req = CreateConversationRequest {
            job_id: key.job_id.clone(),
            homeowner_id: key.homeowner_id.clone(),
            trader_id: key.trader_id.clone(),
        };
        self.spawn_internal(async move {
            let result = with_timeout(timeout, backend.create_conversation(req))
                .await
                .and_then(|resp| {
                    resp.validate()?;
                    Ok(resp)
                });
            InternalEvent::ConversationCreated { key, result }
        });
    }

    pub(super) fn on_conversation_created(
        &mut self,
        key: ConversationKey,
        result: Result<CreateConversationResponse, BackendError>,
    ) {
        self.creating.remove(&key);
        if self.creating.is_empty() {
            self.set_loading(OperationKind::CreateConversation, false);
        }

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(job_id = %key.job_id, err = %e, "create conversation failed");
                self.set_error(OperationKind::CreateConversation, &EngineError::from(e));
                self.emit_state();
                return;
            }
        };

        tracing::info!(conversation_id = %resp.conversation_id, "conversation ready");
        self.dispatch_store(StoreAction::AddConversation(Conversation {
            id: resp.conversation_id,
            job_id: key.job_id.clone(),
            homeowner_id: key.homeowner_id.clone(),
            trader_id: key.trader_id.clone(),
            status: resp.status,
            created_at: resp.created_at,
        }));
        self.clear_error_for(OperationKind::CreateConversation);

        // The store keeps the first id it saw for a triple.
        let registered = self
            .engine
            .conversations
            .find_by_key(&key)
            .map(|c| c.id.clone());
        match registered {
            Some(id) => self.open_conversation(&id),
            None => self.emit_state(),
        }
    }

    /// Marks the conversation closed (job completed). Later sends are rejected locally.
    pub(super) fn end_conversation(&mut self, conversation_id: &str) {
        if self.engine.conversations.get(conversation_id).is_none() {
            let err = EngineError::UnknownConversation(conversation_id.to_string());
            tracing::warn!(%err, "end conversation rejected");
            self.set_error(OperationKind::Validation, &err);
            self.emit_state();
            return;
        }
        tracing::info!(conversation_id, "conversation closed");
        self.dispatch_store(StoreAction::CloseConversation {
            conversation_id: conversation_id.to_string(),
        });
        self.emit_state();
    }
}

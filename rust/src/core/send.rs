use crate::backend::{with_timeout, BackendError, SendMessageRequest, SendMessageResponse};
use crate::error::EngineError;
use crate::state::{now_millis, AttachmentRef, ChatMessage, OperationKind};
use crate::store::{MessagePatch, StoreAction};
use crate::updates::InternalEvent;

use super::AppCore;

impl AppCore {
    /// Optimistic send: the pending message is in the store before this returns, so
    /// dispatch order is display order.
    pub(super) fn send_message(
        &mut self,
        conversation_id: String,
        sender_id: String,
        body: String,
        attachments: Vec<AttachmentRef>,
    ) {
        if let Err(err) = self.validate_send(&conversation_id, &sender_id, &body, &attachments) {
            let op = match err {
                EngineError::ConversationClosed(_) => OperationKind::SendMessage,
                _ => OperationKind::Validation,
            };
            tracing::warn!(%conversation_id, %err, "send rejected");
            self.set_error(op, &err);
            self.emit_state();
            return;
        }
        self.clear_error_for(OperationKind::Validation);

        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id,
            sender_id: sender_id.trim().to_string(),
            body,
            created_at: now_millis(),
            attachments,
            pending: true,
        };
        let req = SendMessageRequest {
            conversation_id: message.conversation_id.clone(),
            message_id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            body: message.body.clone(),
            attachment_refs: message.attachments.clone(),
        };
        tracing::debug!(
            conversation_id = %message.conversation_id,
            message_id = %message.id,
            "pending message appended"
        );
        self.dispatch_store(StoreAction::AddMessage(message));
        self.emit_state();

        let backend = self.backend.clone();
        let timeout = self.config.request_timeout();
        self.spawn_internal(async move {
            let conversation_id = req.conversation_id.clone();
            let message_id = req.message_id.clone();
            let result = with_timeout(timeout, backend.send_message(req))
                .await
                .and_then(|resp| {
                    resp.validate()?;
                    Ok(resp)
                });
            InternalEvent::MessageSendResult {
                conversation_id,
                message_id,
                result,
            }
        });
    }

    fn validate_send(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
        attachments: &[AttachmentRef],
    ) -> Result<(), EngineError> {
        let conversation = self
            .engine
            .conversations
            .get(conversation_id)
            .ok_or_else(|| EngineError::UnknownConversation(conversation_id.to_string()))?;
        if conversation.status.is_closed() {
            return Err(EngineError::ConversationClosed(conversation_id.to_string()));
        }
        if sender_id.trim().is_empty() {
            return Err(EngineError::EmptyField("sender_id"));
        }
        if body.trim().is_empty() && attachments.is_empty() {
            return Err(EngineError::EmptyMessage);
        }
        Ok(())
    }

    pub(super) fn on_message_send_result(
        &mut self,
        conversation_id: String,
        message_id: String,
        result: Result<SendMessageResponse, BackendError>,
    ) {
        match result {
            Ok(resp) => {
                tracing::debug!(%conversation_id, %message_id, "message confirmed");
                let server_id = (resp.message_id != message_id).then_some(resp.message_id);
                self.dispatch_store(StoreAction::UpdateMessage {
                    conversation_id,
                    id: message_id,
                    patch: MessagePatch {
                        id: server_id,
                        ..MessagePatch::confirmed(resp.created_at)
                    },
                });
                self.clear_error_for(OperationKind::SendMessage);
            }
            Err(e) => {
                let still_pending = self
                    .engine
                    .messages
                    .get(&conversation_id, &message_id)
                    .is_some_and(|m| m.pending);
                if !still_pending {
                    // A poll already returned the server's copy: the send landed and only
                    // the ack was lost. Re-sending would duplicate it.
                    tracing::info!(%conversation_id, %message_id, err = %e, "send ack lost; message already confirmed");
                    return;
                }
                tracing::warn!(%conversation_id, %message_id, err = %e, "send failed; rolling back");
                self.dispatch_store(StoreAction::RemoveMessage {
                    conversation_id,
                    id: message_id,
                });
                self.set_error(OperationKind::SendMessage, &EngineError::from(e));
            }
        }
        self.emit_state();
    }
}

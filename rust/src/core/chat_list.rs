use crate::backend::{
    with_timeout, BackendError, CompletedJobDto, ConversationSummaryDto, UnreadCountDto,
};
use crate::error::EngineError;
use crate::state::{now_millis, OperationKind};
use crate::store::StoreAction;
use crate::updates::{ChatListPayload, InternalEvent};

use super::AppCore;

impl AppCore {
    pub(super) fn refresh_chat_list(&mut self, auth_token: String, user_id: String) {
        if self.chat_list_in_flight {
            tracing::debug!("chat list refresh already in flight; suppressed");
            return;
        }
        let user_id = user_id.trim().to_string();
        let missing = if user_id.is_empty() {
            Some("user_id")
        } else if auth_token.trim().is_empty() {
            Some("auth_token")
        } else {
            None
        };
        if let Some(field) = missing {
            let err = EngineError::EmptyField(field);
            tracing::warn!(%err, "chat list refresh rejected");
            self.set_error(OperationKind::Validation, &err);
            self.emit_state();
            return;
        }

        self.chat_list_in_flight = true;
        self.chat_list_token += 1;
        let token = self.chat_list_token;
        self.set_loading(OperationKind::ChatList, true);
        self.emit_state();

        let backend = self.backend.clone();
        let timeout = self.config.request_timeout();
        self.spawn_internal(async move {
            let (conversations, unread, completed) = tokio::join!(
                with_timeout(timeout, backend.list_conversations(&auth_token)),
                with_timeout(timeout, backend.unread_summary(&auth_token)),
                with_timeout(timeout, backend.completed_jobs(&auth_token)),
            );
            InternalEvent::ChatListFetched {
                token,
                user_id,
                result: collect_payload(conversations, unread, completed),
            }
        });
    }

    pub(super) fn on_chat_list_fetched(
        &mut self,
        token: u64,
        user_id: String,
        result: Result<ChatListPayload, BackendError>,
    ) {
        if token != self.chat_list_token {
            tracing::debug!(token, "stale chat list result discarded");
            return;
        }
        self.chat_list_in_flight = false;
        self.set_loading(OperationKind::ChatList, false);

        match result {
            Ok(payload) => {
                for summary in &payload.conversations {
                    self.dispatch_store(StoreAction::AddConversation(summary.to_conversation()));
                }
                self.chat_list = crate::chat_list::aggregate(
                    &user_id,
                    &payload.conversations,
                    &payload.unread,
                    &payload.completed,
                    now_millis(),
                );
                tracing::info!(
                    active = self.chat_list.active.len(),
                    past = self.chat_list.past.len(),
                    "chat list refreshed"
                );
                self.clear_error_for(OperationKind::ChatList);
            }
            Err(e) => {
                tracing::warn!(err = %e, "chat list refresh failed; keeping previous list");
                self.set_error(OperationKind::ChatList, &EngineError::from(e));
            }
        }
        self.emit_state();
    }
}

// Any failed feed fails the whole refresh.
fn collect_payload(
    conversations: Result<Vec<ConversationSummaryDto>, BackendError>,
    unread: Result<Vec<UnreadCountDto>, BackendError>,
    completed: Result<Vec<CompletedJobDto>, BackendError>,
) -> Result<ChatListPayload, BackendError> {
    let conversations = conversations?;
    conversations
        .iter()
        .try_for_each(ConversationSummaryDto::validate)?;
    let completed = completed?;
    completed.iter().try_for_each(CompletedJobDto::validate)?;
    Ok(ChatListPayload {
        conversations,
        unread: unread?,
        completed,
    })
}

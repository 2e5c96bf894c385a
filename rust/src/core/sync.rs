use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::{validate_messages, with_timeout, BackendError, MessageDto};
use crate::error::EngineError;
use crate::state::{ChatMessage, OperationKind};
use crate::store::StoreAction;
use crate::updates::{CoreMsg, InternalEvent};

use super::AppCore;

/// One polling subscription. Results tagged with another generation are stale.
pub(super) struct PollSubscription {
    conversation_id: String,
    generation: u64,
    task: JoinHandle<()>,
}

impl AppCore {
    /// Make `conversation_id` the active conversation and (re)start its polling loop.
    pub(super) fn open_conversation(&mut self, conversation_id: &str) {
        if self.engine.conversations.get(conversation_id).is_none() {
            let err = EngineError::UnknownConversation(conversation_id.to_string());
            tracing::warn!(%err, "open conversation rejected");
            self.set_error(OperationKind::Validation, &err);
            self.emit_state();
            return;
        }
        if self
            .poll
            .as_ref()
            .is_some_and(|p| p.conversation_id == conversation_id)
        {
            self.emit_state();
            return;
        }

        self.stop_polling();
        self.poll_generation += 1;
        let generation = self.poll_generation;
        self.active_conversation_id = Some(conversation_id.to_string());
        self.set_loading(OperationKind::LoadMessages, true);

        let task = self.spawn_poll_loop(conversation_id.to_string(), generation);
        self.poll = Some(PollSubscription {
            conversation_id: conversation_id.to_string(),
            generation,
            task,
        });
        tracing::info!(conversation_id, generation, "polling started");
        self.emit_state();
    }

    pub(super) fn leave_conversation(&mut self) {
        self.stop_polling();
        self.active_conversation_id = None;
        self.emit_state();
    }

    pub(super) fn stop_polling(&mut self) {
        if let Some(sub) = self.poll.take() {
            tracing::info!(
                conversation_id = %sub.conversation_id,
                generation = sub.generation,
                "polling stopped"
            );
            sub.task.abort();
        }
        self.set_loading(OperationKind::LoadMessages, false);
    }

    fn spawn_poll_loop(&self, conversation_id: String, generation: u64) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let tx = self.core_sender.clone();
        let period = self.config.poll_interval();
        let timeout = self.config.request_timeout();
        self.runtime.spawn(async move {
            // The first tick completes immediately.
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let result = with_timeout(timeout, backend.list_messages(&conversation_id))
                    .await
                    .and_then(|messages| {
                        validate_messages(&conversation_id, &messages)?;
                        Ok(messages)
                    });
                let event = InternalEvent::MessagesFetched {
                    conversation_id: conversation_id.clone(),
                    generation,
                    result,
                };
                if tx.send(CoreMsg::Internal(Box::new(event))).is_err() {
                    break;
                }
            }
        })
    }

    pub(super) fn on_messages_fetched(
        &mut self,
        conversation_id: String,
        generation: u64,
        result: Result<Vec<MessageDto>, BackendError>,
    ) {
        let current = self
            .poll
            .as_ref()
            .is_some_and(|p| p.generation == generation && p.conversation_id == conversation_id);
        if !current {
            tracing::debug!(%conversation_id, generation, "stale poll result discarded");
            return;
        }

        let was_loading = self.engine.busy.loading_messages;
        if was_loading {
            self.set_loading(OperationKind::LoadMessages, false);
        }

        match result {
            Ok(fetched) => {
                let messages: Vec<ChatMessage> =
                    fetched.into_iter().map(MessageDto::into_confirmed).collect();
                let before = self.engine.messages.list(&conversation_id).to_vec();
                self.dispatch_store(StoreAction::SetMessagesForConversation {
                    conversation_id: conversation_id.clone(),
                    messages,
                });
                if was_loading || self.engine.messages.list(&conversation_id) != before.as_slice() {
                    self.emit_state();
                }
            }
            Err(e) => {
                // Polling failures never surface as an error; the next tick retries.
                tracing::warn!(%conversation_id, err = %e, "poll failed");
                if was_loading {
                    self.emit_state();
                }
            }
        }
    }
}

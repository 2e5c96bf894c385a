mod chat_list;
mod config;
mod conversations;
mod mirror;
mod send;
mod sync;

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::backend::SharedBackend;
use crate::error::EngineError;
use crate::state::{AppState, ChatListState, ChatViewState, ConversationKey, OperationKind};
use crate::store::{reduce, EngineState, StoreAction};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

use mirror::{JsonFileMirror, MirrorCache, MirrorSnapshot};

pub struct AppCore {
    engine: EngineState,
    rev: u64,
    active_conversation_id: Option<String>,
    chat_list: ChatListState,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,
    backend: SharedBackend,

    // At most one polling subscription: the open conversation.
    poll: Option<sync::PollSubscription>,
    poll_generation: u64,

    // Triples with a create call in flight.
    creating: HashSet<ConversationKey>,

    chat_list_in_flight: bool,
    chat_list_token: u64,

    mirror: Option<Box<dyn MirrorCache>>,
    last_mirrored: Option<MirrorSnapshot>,
}

impl AppCore {
    /// `backend: None` picks one from `<data_dir>/jobchat_config.json`.
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        backend: Option<SharedBackend>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("tokio runtime");

        let backend = backend.unwrap_or_else(|| config.build_backend());
        let mirror: Option<Box<dyn MirrorCache>> = if config.mirror_enabled() {
            Some(Box::new(JsonFileMirror::new(&data_dir)))
        } else {
            None
        };

        let mut this = Self {
            engine: EngineState::default(),
            rev: 0,
            active_conversation_id: None,
            chat_list: ChatListState::empty(),
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            backend,
            poll: None,
            poll_generation: 0,
            creating: HashSet::new(),
            chat_list_in_flight: false,
            chat_list_token: 0,
            mirror,
            last_mirrored: None,
        };
        this.hydrate_from_mirror();

        // Ensure ChatApp.state() has an immediately-available snapshot.
        let snapshot = this.project();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn hydrate_from_mirror(&mut self) {
        let Some(mirror) = self.mirror.as_ref() else {
            return;
        };
        match mirror.load() {
            Ok(Some(snapshot)) => {
                for action in snapshot.clone().into_actions() {
                    self.dispatch_store(action);
                }
                tracing::info!(
                    conversations = self.engine.conversations.len(),
                    "hydrated from mirror"
                );
                self.last_mirrored = Some(snapshot);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(err = format!("{e:#}"), "mirror unreadable; starting empty"),
        }
    }

    fn mirror_state(&mut self) {
        let Some(mirror) = self.mirror.as_ref() else {
            return;
        };
        // Nothing to keep yet; don't create an empty cache file.
        if self.last_mirrored.is_none() && self.engine.conversations.is_empty() {
            return;
        }
        let snapshot = MirrorSnapshot::capture(&self.engine);
        if self.last_mirrored.as_ref() == Some(&snapshot) {
            return;
        }
        match mirror.store(&snapshot) {
            Ok(()) => self.last_mirrored = Some(snapshot),
            Err(e) => tracing::warn!(err = format!("{e:#}"), "mirror write failed"),
        }
    }

    /// Every store mutation goes through here.
    fn dispatch_store(&mut self, action: StoreAction) {
        tracing::trace!(action = action.tag(), "reduce");
        let engine = std::mem::take(&mut self.engine);
        self.engine = reduce(engine, action);
    }

    fn set_loading(&mut self, op: OperationKind, loading: bool) {
        self.dispatch_store(StoreAction::SetLoading { op, loading });
    }

    fn set_error(&mut self, op: OperationKind, err: &EngineError) {
        self.dispatch_store(StoreAction::SetError {
            op,
            error: Some(err.to_app_error(op)),
        });
    }

    fn clear_error_for(&mut self, op: OperationKind) {
        self.dispatch_store(StoreAction::SetError { op, error: None });
    }

    fn project(&self) -> AppState {
        let current_chat = self
            .active_conversation_id
            .as_deref()
            .and_then(|id| self.engine.conversations.get(id))
            .map(|conversation| ChatViewState {
                conversation: conversation.clone(),
                messages: self.engine.messages.list(&conversation.id).to_vec(),
                can_send: !conversation.status.is_closed(),
            });
        AppState {
            rev: self.rev,
            conversations: self.engine.conversations.iter().cloned().collect(),
            active_conversation_id: self.active_conversation_id.clone(),
            current_chat,
            chat_list: self.chat_list.clone(),
            busy: self.engine.busy.clone(),
            error: self.engine.error.clone(),
        }
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.rev += 1;
        let snapshot = self.project();
        self.commit_state_snapshot(&snapshot);
        self.mirror_state();
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    /// Run `fut` on the runtime and route its event back onto the actor queue.
    fn spawn_internal<F>(&self, fut: F)
    where
        F: Future<Output = InternalEvent> + Send + 'static,
    {
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let event = fut.await;
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: it carries message bodies and auth tokens.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
            CoreMsg::Shutdown => self.shutdown(),
        }
    }

    /// Cancels the polling subscription. The runtime, and every task still on it,
    /// goes away when the core is dropped.
    pub fn shutdown(&mut self) {
        tracing::info!("core shutting down");
        self.stop_polling();
        self.active_conversation_id = None;
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            // Conversations
            AppAction::CreateConversation {
                job_id,
                homeowner_id,
                trader_id,
            } => {
                let key = ConversationKey::new(&job_id, &homeowner_id, &trader_id);
                self.get_or_create_conversation(key);
            }
            AppAction::OpenConversation { conversation_id } => {
                self.open_conversation(&conversation_id);
            }
            AppAction::LeaveConversation => self.leave_conversation(),
            AppAction::EndConversation { conversation_id } => {
                self.end_conversation(&conversation_id);
            }

            // Messages
            AppAction::SendMessage {
                conversation_id,
                sender_id,
                body,
                attachments,
            } => self.send_message(conversation_id, sender_id, body, attachments),

            // Chat list
            AppAction::RefreshChatList {
                auth_token,
                user_id,
            } => self.refresh_chat_list(auth_token, user_id),

            // UI
            AppAction::ClearError => {
                self.dispatch_store(StoreAction::ClearError);
                self.emit_state();
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::ConversationCreated { key, result } => {
                self.on_conversation_created(key, result);
            }
            InternalEvent::MessageSendResult {
                conversation_id,
                message_id,
                result,
            } => self.on_message_send_result(conversation_id, message_id, result),
            InternalEvent::MessagesFetched {
                conversation_id,
                generation,
                result,
            } => self.on_messages_fetched(conversation_id, generation, result),
            InternalEvent::ChatListFetched {
                token,
                user_id,
                result,
            } => self.on_chat_list_fetched(token, user_id, result),
        }
    }
}

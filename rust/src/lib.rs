mod actions;
pub mod backend;
pub mod chat_list;
mod core;
pub mod error;
mod logging;
mod state;
pub mod store;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

use crate::backend::SharedBackend;

pub use actions::AppAction;
pub use state::*;
pub use updates::*;

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

#[derive(uniffi::Object)]
pub struct ChatApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
}

#[uniffi::export]
impl ChatApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Arc<Self> {
        Self::start(data_dir, None)
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    /// Messages of the open conversation, pending ones included.
    pub fn current_messages(&self) -> Vec<ChatMessage> {
        self.state()
            .current_chat
            .map(|chat| chat.messages)
            .unwrap_or_default()
    }

    pub fn chat_list(&self) -> ChatListState {
        self.state().chat_list
    }
}

impl Drop for ChatApp {
    fn drop(&mut self) {
        // The actor and its tasks hold their own senders, so closing ours is not enough.
        let _ = self.core_tx.send(CoreMsg::Shutdown);
    }
}

impl ChatApp {
    /// Like [`ChatApp::new`], with an injected backend instead of the configured one.
    pub fn with_backend(data_dir: String, backend: SharedBackend) -> Arc<Self> {
        Self::start(data_dir, Some(backend))
    }

    fn start(data_dir: String, backend: Option<SharedBackend>) -> Arc<Self> {
        logging::init_logging();
        tracing::info!(data_dir = %data_dir, "ChatApp starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                shared_for_core,
                backend,
            );
            while let Ok(msg) = core_rx.recv() {
                let shutdown = matches!(msg, CoreMsg::Shutdown);
                core.handle_message(msg);
                if shutdown {
                    break;
                }
            }
            tracing::info!("core actor stopped");
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        })
    }
}

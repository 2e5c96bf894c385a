//! Conversation and message stores, and the reducer that owns every mutation.
//!
//! Nothing outside this module can mutate a store: the mutating methods are private
//! and only [`reduce`] calls them. The actor feeds it one [`StoreAction`] at a time,
//! so a transition is never observed half-applied.

use std::collections::{HashMap, HashSet};

use crate::state::{
    AppError, BusyState, ChatMessage, Conversation, ConversationKey, ConversationStatus,
    OperationKind,
};

#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    by_id: HashMap<String, Conversation>,
    // Registration order, for stable listing.
    order: Vec<String>,
}

impl ConversationStore {
    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.by_id.get(id)
    }

    pub fn find_by_key(&self, key: &ConversationKey) -> Option<&Conversation> {
        self.iter().find(|c| &c.key() == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn upsert(&mut self, conversation: Conversation) {
        if let Some(existing) = self.by_id.get_mut(&conversation.id) {
            // Identity and creation time are immutable; status only moves towards closed.
            if conversation.status.is_closed() {
                existing.status = conversation.status;
            }
            return;
        }
        if let Some(other) = self.find_by_key(&conversation.key()) {
            tracing::warn!(
                existing = %other.id,
                ignored = %conversation.id,
                "second conversation for the same job/homeowner/trader ignored"
            );
            return;
        }
        self.order.push(conversation.id.clone());
        self.by_id.insert(conversation.id.clone(), conversation);
    }

    fn close(&mut self, id: &str) -> bool {
        match self.by_id.get_mut(id) {
            Some(c) if !c.status.is_closed() => {
                c.status = ConversationStatus::Closed;
                true
            }
            _ => false,
        }
    }
}

/// Partial update applied to one message in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub pending: Option<bool>,
    pub created_at: Option<i64>,
    /// Server-assigned id, when the backend did not keep the client id.
    pub id: Option<String>,
}

impl MessagePatch {
    pub fn confirmed(created_at: i64) -> Self {
        Self {
            pending: Some(false),
            created_at: Some(created_at),
            id: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    by_conversation: HashMap<String, Vec<ChatMessage>>,
    // Locally sent messages confirmed by their own send call but not yet seen in a
    // fetched snapshot, with the number of snapshots that have missed them so far.
    // A snapshot taken before the send landed must not drop them.
    unechoed: HashMap<String, HashMap<String, u32>>,
}

/// Snapshots an unechoed message survives before the server's silence is taken as final.
pub const UNECHOED_GRACE_SNAPSHOTS: u32 = 3;

impl MessageStore {
    pub fn list(&self, conversation_id: &str) -> &[ChatMessage] {
        self.by_conversation
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, conversation_id: &str, id: &str) -> Option<&ChatMessage> {
        self.list(conversation_id).iter().find(|m| m.id == id)
    }

    pub fn conversation_ids(&self) -> impl Iterator<Item = &String> {
        self.by_conversation.keys()
    }

    fn append(&mut self, message: ChatMessage) {
        let list = self
            .by_conversation
            .entry(message.conversation_id.clone())
            .or_default();
        if list.iter().any(|m| m.id == message.id) {
            tracing::debug!(id = %message.id, "append: duplicate id ignored");
            return;
        }
        list.push(message);
    }

    fn update_by_id(&mut self, conversation_id: &str, id: &str, patch: MessagePatch) -> bool {
        let Some(list) = self.by_conversation.get_mut(conversation_id) else {
            return false;
        };
        // A fetched copy already holds the server id: it wins over the local entry.
        if let Some(new_id) = patch.id.as_deref().filter(|new_id| *new_id != id) {
            if list.iter().any(|m| m.id == new_id) {
                let before = list.len();
                list.retain(|m| m.id != id);
                return before != list.len();
            }
        }
        let Some(msg) = list.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        let was_pending = msg.pending;
        if let Some(new_id) = patch.id {
            msg.id = new_id;
        }
        if let Some(created_at) = patch.created_at {
            msg.created_at = created_at;
        }
        if let Some(pending) = patch.pending {
            msg.pending = pending;
        }
        if was_pending && !msg.pending {
            let confirmed_id = msg.id.clone();
            self.unechoed
                .entry(conversation_id.to_string())
                .or_default()
                .insert(confirmed_id, 0);
        }
        true
    }

    // Only pending messages can be discarded; confirmed ones are authoritative.
    fn remove_pending(&mut self, conversation_id: &str, id: &str) -> bool {
        let Some(list) = self.by_conversation.get_mut(conversation_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|m| !(m.id == id && m.pending));
        before != list.len()
    }

    /// Merge an authoritative snapshot:
    /// - fetched messages become the confirmed set, in server order;
    /// - local pending messages not in the snapshot are kept after it, in their
    ///   original order, until their own send resolves;
    /// - locally confirmed messages not yet echoed are kept the same way, for at most
    ///   [`UNECHOED_GRACE_SNAPSHOTS`] snapshots that miss them;
    /// - a local entry whose id is in the snapshot is superseded by the fetched copy.
    fn replace_all(&mut self, conversation_id: &str, fetched: Vec<ChatMessage>) {
        let existing = self
            .by_conversation
            .remove(conversation_id)
            .unwrap_or_default();

        let mut seen: HashSet<String> = HashSet::with_capacity(fetched.len());
        let mut merged: Vec<ChatMessage> = Vec::with_capacity(fetched.len() + existing.len());
        for mut m in fetched {
            if seen.insert(m.id.clone()) {
                m.pending = false;
                merged.push(m);
            }
        }

        let unechoed = self
            .unechoed
            .entry(conversation_id.to_string())
            .or_default();
        unechoed.retain(|id, misses| {
            if seen.contains(id) {
                return false;
            }
            *misses += 1;
            if *misses > UNECHOED_GRACE_SNAPSHOTS {
                tracing::warn!(%conversation_id, %id, "confirmed message never echoed; dropped");
                return false;
            }
            true
        });
        merged.extend(
            existing
                .into_iter()
                .filter(|m| !seen.contains(&m.id) && (m.pending || unechoed.contains_key(&m.id))),
        );
        self.by_conversation
            .insert(conversation_id.to_string(), merged);
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub conversations: ConversationStore,
    pub messages: MessageStore,
    pub busy: BusyState,
    pub error: Option<AppError>,
}

#[derive(Debug, Clone)]
pub enum StoreAction {
    SetLoading {
        op: OperationKind,
        loading: bool,
    },
    /// `error: None` clears the error, but only when it belongs to `op`.
    SetError {
        op: OperationKind,
        error: Option<AppError>,
    },
    ClearError,
    AddConversation(Conversation),
    CloseConversation {
        conversation_id: String,
    },
    AddMessage(ChatMessage),
    UpdateMessage {
        conversation_id: String,
        id: String,
        patch: MessagePatch,
    },
    RemoveMessage {
        conversation_id: String,
        id: String,
    },
    SetMessagesForConversation {
        conversation_id: String,
        messages: Vec<ChatMessage>,
    },
}

impl StoreAction {
    pub fn tag(&self) -> &'static str {
        match self {
            StoreAction::SetLoading { .. } => "SetLoading",
            StoreAction::SetError { .. } => "SetError",
            StoreAction::ClearError => "ClearError",
            StoreAction::AddConversation(_) => "AddConversation",
            StoreAction::CloseConversation { .. } => "CloseConversation",
            StoreAction::AddMessage(_) => "AddMessage",
            StoreAction::UpdateMessage { .. } => "UpdateMessage",
            StoreAction::RemoveMessage { .. } => "RemoveMessage",
            StoreAction::SetMessagesForConversation { .. } => "SetMessagesForConversation",
        }
    }
}

/// The single state transition function.
pub fn reduce(mut state: EngineState, action: StoreAction) -> EngineState {
    match action {
        StoreAction::SetLoading { op, loading } => {
            state.busy.set(op, loading);
        }
        StoreAction::SetError { op, error } => match error {
            Some(err) => state.error = Some(err),
            None => {
                if state.error.as_ref().is_some_and(|e| e.op == op) {
                    state.error = None;
                }
            }
        },
        StoreAction::ClearError => {
            state.error = None;
        }
        StoreAction::AddConversation(conversation) => {
            state.conversations.upsert(conversation);
        }
        StoreAction::CloseConversation { conversation_id } => {
            if !state.conversations.close(&conversation_id) {
                tracing::debug!(%conversation_id, "close: unknown or already closed");
            }
        }
        StoreAction::AddMessage(message) => {
            let closed = state
                .conversations
                .get(&message.conversation_id)
                .is_some_and(|c| c.status.is_closed());
            if closed && message.pending {
                tracing::warn!(
                    conversation_id = %message.conversation_id,
                    "append into closed conversation refused"
                );
            } else {
                state.messages.append(message);
            }
        }
        StoreAction::UpdateMessage {
            conversation_id,
            id,
            patch,
        } => {
            if !state.messages.update_by_id(&conversation_id, &id, patch) {
                tracing::debug!(%conversation_id, %id, "update: message not found");
            }
        }
        StoreAction::RemoveMessage {
            conversation_id,
            id,
        } => {
            if !state.messages.remove_pending(&conversation_id, &id) {
                tracing::debug!(%conversation_id, %id, "remove: no pending message with this id");
            }
        }
        StoreAction::SetMessagesForConversation {
            conversation_id,
            messages,
        } => {
            state.messages.replace_all(&conversation_id, messages);
        }
    }
    state
}

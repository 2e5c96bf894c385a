// Optional on-disk mirror of confirmed state, replayed through the reducer at startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::state::{ChatMessage, Conversation};
use crate::store::{EngineState, StoreAction};

pub(super) const MIRROR_FILE: &str = "jobchat_cache.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorSnapshot {
    pub conversations: Vec<Conversation>,
    pub messages: BTreeMap<String, Vec<ChatMessage>>,
}

impl MirrorSnapshot {
    /// Conversations and confirmed messages only; pending messages are never mirrored.
    pub(super) fn capture(engine: &EngineState) -> Self {
        let conversations: Vec<Conversation> = engine.conversations.iter().cloned().collect();
        let messages = engine
            .messages
            .conversation_ids()
            .map(|id| {
                let confirmed: Vec<ChatMessage> = engine
                    .messages
                    .list(id)
                    .iter()
                    .filter(|m| !m.pending)
                    .cloned()
                    .collect();
                (id.clone(), confirmed)
            })
            .filter(|(_, list)| !list.is_empty())
            .collect();
        Self {
            conversations,
            messages,
        }
    }

    /// Reducer actions that rebuild this snapshot into an empty engine.
    pub(super) fn into_actions(self) -> Vec<StoreAction> {
        let mut actions: Vec<StoreAction> = self
            .conversations
            .into_iter()
            .map(StoreAction::AddConversation)
            .collect();
        actions.extend(self.messages.into_iter().map(|(conversation_id, messages)| {
            StoreAction::SetMessagesForConversation {
                conversation_id,
                messages,
            }
        }));
        actions
    }
}

pub trait MirrorCache: Send {
    fn load(&self) -> anyhow::Result<Option<MirrorSnapshot>>;
    fn store(&self, snapshot: &MirrorSnapshot) -> anyhow::Result<()>;
}

pub struct JsonFileMirror {
    path: PathBuf,
}

impl JsonFileMirror {
    pub fn new(data_dir: &str) -> Self {
        Self {
            path: Path::new(data_dir).join(MIRROR_FILE),
        }
    }
}

impl MirrorCache for JsonFileMirror {
    fn load(&self) -> anyhow::Result<Option<MirrorSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        let snapshot = serde_json::from_slice(&data)
            .with_context(|| format!("parse {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    fn store(&self, snapshot: &MirrorSnapshot) -> anyhow::Result<()> {
        let json = serde_json::to_vec(snapshot).context("encode mirror")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename to {}", self.path.display()))?;
        Ok(())
    }
}

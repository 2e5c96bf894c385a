use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::backend::{CompletedJobDto, ConversationSummaryDto, UnreadCountDto};
use crate::state::{ChatListState, ChatSummary};

/// Index over the completed-jobs feed. Each entry is matched with the most specific
/// reference it carries: a conversation id, else a (job, participant) pair, else the
/// job alone.
struct CompletedIndex<'a> {
    conversations: HashSet<&'a str>,
    job_parties: HashSet<(&'a str, &'a str)>,
    jobs: HashSet<&'a str>,
}

impl<'a> CompletedIndex<'a> {
    fn new(feed: &'a [CompletedJobDto]) -> Self {
        let mut index = Self {
            conversations: HashSet::new(),
            job_parties: HashSet::new(),
            jobs: HashSet::new(),
        };
        for entry in feed {
            if let Some(id) = entry.conversation_id.as_deref() {
                index.conversations.insert(id);
                continue;
            }
            let parties: Vec<&str> = [entry.trader_id.as_deref(), entry.homeowner_id.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            if parties.is_empty() {
                index.jobs.insert(entry.job_id.as_str());
            } else {
                for party in parties {
                    index.job_parties.insert((entry.job_id.as_str(), party));
                }
            }
        }
        index
    }

    fn is_past(&self, conversation_id: &str, job_id: &str, counterparty_id: &str) -> bool {
        self.conversations.contains(conversation_id)
            || self.job_parties.contains(&(job_id, counterparty_id))
            || self.jobs.contains(job_id)
    }
}

fn summarize(
    dto: &ConversationSummaryDto,
    user_id: &str,
    unread: &HashMap<&str, u32>,
    completed: &CompletedIndex<'_>,
) -> ChatSummary {
    let counterparty_id = dto.to_conversation().counterparty_of(user_id).to_string();
    let is_past = completed.is_past(&dto.conversation_id, &dto.job_id, &counterparty_id);
    ChatSummary {
        conversation_id: dto.conversation_id.clone(),
        job_id: dto.job_id.clone(),
        counterparty_id,
        counterparty_name: dto.counterparty_name.clone(),
        status: dto.status,
        created_at: dto.created_at,
        last_message: dto.last_message.as_ref().map(|m| m.body.clone()),
        last_message_at: dto.last_message.as_ref().map(|m| m.created_at),
        message_count: dto.message_count,
        unread_count: unread
            .get(dto.conversation_id.as_str())
            .copied()
            .unwrap_or(0),
        is_past,
    }
}

// Most recent first; the id breaks ties so equal timestamps never reorder between runs.
fn by_recency(a: &ChatSummary, b: &ChatSummary) -> std::cmp::Ordering {
    Reverse(a.activity_at())
        .cmp(&Reverse(b.activity_at()))
        .then_with(|| a.conversation_id.cmp(&b.conversation_id))
}

/// Joins the conversation list with unread counts and the completed-jobs feed, then
/// partitions it into active (latest conversation per counterparty) and past chats.
pub fn aggregate(
    user_id: &str,
    conversations: &[ConversationSummaryDto],
    unread: &[UnreadCountDto],
    completed: &[CompletedJobDto],
    fetched_at: i64,
) -> ChatListState {
    let unread: HashMap<&str, u32> = unread
        .iter()
        .map(|u| (u.conversation_id.as_str(), u.unread_count))
        .collect();
    let completed = CompletedIndex::new(completed);

    let mut groups: BTreeMap<String, Vec<ChatSummary>> = BTreeMap::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for dto in conversations {
        if !seen.insert(dto.conversation_id.as_str()) {
            tracing::debug!(conversation_id = %dto.conversation_id, "duplicate summary skipped");
            continue;
        }
        let summary = summarize(dto, user_id, &unread, &completed);
        groups
            .entry(summary.counterparty_id.clone())
            .or_default()
            .push(summary);
    }

    let mut active = Vec::new();
    let mut past = Vec::new();
    for (_, mut group) in groups {
        group.sort_by(by_recency);
        let mut latest_active_taken = false;
        for summary in group {
            if summary.is_past {
                past.push(summary);
            } else if !latest_active_taken {
                latest_active_taken = true;
                active.push(summary);
            }
        }
    }
    active.sort_by(by_recency);
    past.sort_by(by_recency);

    ChatListState {
        active,
        past,
        fetched_at: Some(fetched_at),
    }
}

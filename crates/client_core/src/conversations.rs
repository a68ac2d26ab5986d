//! Conversation list kept in sync with server-pushed deltas.
//!
//! [`ConversationList`] holds the ordering rules and is free of I/O.
//! [`ConversationSynchronizer`] wraps it with the timers the page needs:
//! the remote typing auto-clear and the periodic presence refresh.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use shared::{
    domain::{ChatId, UserId},
    protocol::{ConversationSummary, ConversationUpdate, ReadReceipt, TypingUpdate},
};
use tokio::{
    sync::{broadcast, Mutex},
    time::Instant,
};
use tracing::{debug, warn};

use crate::{
    backend::ReadAcknowledger,
    config::Timings,
    events::SessionEvent,
    presence::{is_recently_active, presence_label},
    timer::{Ticker, TimerSlot},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationFilter {
    #[default]
    All,
    Unread,
    Online,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationList {
    conversations: Vec<ConversationSummary>,
}

impl ConversationList {
    /// Builds the list from a server snapshot, most recent message first.
    pub fn from_snapshot(mut conversations: Vec<ConversationSummary>) -> Self {
        conversations.sort_by(|a, b| b.last_message.sent_at.cmp(&a.last_message.sent_at));
        Self { conversations }
    }

    pub fn replace_snapshot(&mut self, conversations: Vec<ConversationSummary>) {
        *self = Self::from_snapshot(conversations);
    }

    pub fn as_slice(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, chat_id: ChatId) -> Option<&ConversationSummary> {
        self.conversations.iter().find(|c| c.chat_id == chat_id)
    }

    pub fn position(&self, chat_id: ChatId) -> Option<usize> {
        self.conversations.iter().position(|c| c.chat_id == chat_id)
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations
            .iter()
            .fold(0u32, |acc, c| acc.saturating_add(c.unread_count))
    }

    /// Returns false when the delta references no known conversation.
    pub fn apply_conversation_update(
        &mut self,
        update: &ConversationUpdate,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(chat_id) = update.chat_id else {
            return false;
        };
        let Some(index) = self.position(chat_id) else {
            return false;
        };

        let conversation = &mut self.conversations[index];
        if let Some(delta) = &update.message {
            let preview = &mut conversation.last_message;
            if let Some(id) = delta.id {
                preview.id = Some(id);
            }
            if let Some(content) = &delta.content {
                preview.content.clone_from(content);
            }
            if let Some(kind) = delta.kind {
                preview.kind = kind;
            }
            if let Some(is_from_me) = delta.is_from_me {
                preview.is_from_me = is_from_me;
            }
            preview.sent_at = delta.sent_at.unwrap_or(now);
        }
        if let Some(unread_count) = update.unread_count {
            conversation.unread_count = unread_count;
        }

        if update.message.is_some() && index != 0 {
            let conversation = self.conversations.remove(index);
            self.conversations.insert(0, conversation);
        }
        true
    }

    pub fn apply_read_receipt(&mut self, chat_id: ChatId) -> bool {
        match self.conversations.iter_mut().find(|c| c.chat_id == chat_id) {
            Some(conversation) => {
                conversation.unread_count = 0;
                true
            }
            None => false,
        }
    }

    /// Typing indicators are keyed by the counterpart's user id.
    pub fn set_typing(&mut self, user_id: UserId, is_typing: bool) -> bool {
        match self.conversations.iter_mut().find(|c| c.id == user_id) {
            Some(conversation) if conversation.is_typing != is_typing => {
                conversation.is_typing = is_typing;
                true
            }
            _ => false,
        }
    }

    pub fn refresh_presence(&mut self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        let mut changed = false;
        for conversation in &mut self.conversations {
            let Some(last_active_at) = conversation.last_active_at else {
                continue;
            };
            let online = is_recently_active(last_active_at, now, window);
            if conversation.is_online != online {
                conversation.is_online = online;
                changed = true;
            }
        }
        changed
    }

    pub fn filtered(&self, search: &str, filter: ConversationFilter) -> Vec<&ConversationSummary> {
        let needle = search.trim().to_lowercase();
        self.conversations
            .iter()
            .filter(|c| {
                needle.is_empty()
                    || c.name.to_lowercase().contains(&needle)
                    || c.full_name.to_lowercase().contains(&needle)
                    || c.last_message.content.to_lowercase().contains(&needle)
            })
            .filter(|c| match filter {
                ConversationFilter::All => true,
                ConversationFilter::Unread => c.unread_count > 0,
                ConversationFilter::Online => c.is_online,
            })
            .collect()
    }
}

fn chrono_window(window: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(365))
}

struct SyncState {
    list: ConversationList,
    typing_clears: HashMap<UserId, TimerSlot>,
}

struct SyncInner {
    state: Mutex<SyncState>,
    presence: Mutex<Ticker>,
    events: broadcast::Sender<SessionEvent>,
    read_acknowledger: Arc<dyn ReadAcknowledger>,
    local_user_id: Option<UserId>,
    timings: Timings,
}

impl SyncInner {
    fn publish(&self, list: &ConversationList) {
        let _ = self
            .events
            .send(SessionEvent::ConversationsChanged(list.as_slice().to_vec()));
    }

    async fn clear_remote_typing(&self, user_id: UserId, generation: u64) {
        let mut state = self.state.lock().await;
        let claimed = state
            .typing_clears
            .get_mut(&user_id)
            .is_some_and(|slot| slot.take_if_current(generation));
        if !claimed {
            return;
        }
        state.typing_clears.remove(&user_id);
        debug!(user_id = user_id.0, "sync: remote typing indicator expired");
        if state.list.set_typing(user_id, false) {
            self.publish(&state.list);
        }
    }

    async fn refresh_presence(&self) {
        let mut state = self.state.lock().await;
        let window = chrono_window(self.timings.online_window);
        if state.list.refresh_presence(Utc::now(), window) {
            self.publish(&state.list);
        }
    }
}

#[derive(Clone)]
pub struct ConversationSynchronizer {
    inner: Arc<SyncInner>,
}

impl ConversationSynchronizer {
    pub fn new(
        snapshot: Vec<ConversationSummary>,
        read_acknowledger: Arc<dyn ReadAcknowledger>,
        events: broadcast::Sender<SessionEvent>,
        local_user_id: Option<UserId>,
        timings: Timings,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                state: Mutex::new(SyncState {
                    list: ConversationList::from_snapshot(snapshot),
                    typing_clears: HashMap::new(),
                }),
                presence: Mutex::new(Ticker::default()),
                events,
                read_acknowledger,
                local_user_id,
                timings,
            }),
        }
    }

    pub async fn snapshot(&self) -> Vec<ConversationSummary> {
        self.inner.state.lock().await.list.as_slice().to_vec()
    }

    pub async fn conversation(&self, chat_id: ChatId) -> Option<ConversationSummary> {
        self.inner.state.lock().await.list.get(chat_id).cloned()
    }

    pub async fn filtered(
        &self,
        search: &str,
        filter: ConversationFilter,
    ) -> Vec<ConversationSummary> {
        let state = self.inner.state.lock().await;
        state
            .list
            .filtered(search, filter)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn total_unread(&self) -> u32 {
        self.inner.state.lock().await.list.total_unread()
    }

    pub async fn presence_label(&self, chat_id: ChatId) -> Option<String> {
        let last_active_at = self.conversation(chat_id).await?.last_active_at;
        presence_label(
            last_active_at,
            Utc::now(),
            chrono_window(self.inner.timings.online_window),
        )
    }

    pub async fn is_user_typing(&self, user_id: UserId) -> bool {
        self.inner
            .state
            .lock()
            .await
            .typing_clears
            .get(&user_id)
            .is_some_and(TimerSlot::is_armed)
    }

    pub async fn replace_snapshot(&self, conversations: Vec<ConversationSummary>) {
        let mut state = self.inner.state.lock().await;
        state.list.replace_snapshot(conversations);
        let typing: Vec<UserId> = state.typing_clears.keys().copied().collect();
        for user_id in typing {
            state.list.set_typing(user_id, true);
        }
        self.inner.publish(&state.list);
    }

    pub async fn apply_conversation_update(&self, update: &ConversationUpdate) -> bool {
        let mut state = self.inner.state.lock().await;
        let applied = state.list.apply_conversation_update(update, Utc::now());
        if applied {
            self.inner.publish(&state.list);
        } else {
            debug!(chat_id = ?update.chat_id, "sync: dropped conversation update for unknown chat");
        }
        applied
    }

    pub async fn apply_read_receipt(&self, receipt: &ReadReceipt) -> bool {
        let Some(chat_id) = receipt.chat_id else {
            debug!("sync: dropped read receipt without chat id");
            return false;
        };
        let mut state = self.inner.state.lock().await;
        let applied = state.list.apply_read_receipt(chat_id);
        if applied {
            self.inner.publish(&state.list);
        }
        applied
    }

    pub async fn apply_typing_event(&self, update: &TypingUpdate) -> bool {
        let Some(user_id) = update.user_id else {
            debug!("sync: dropped typing event without user id");
            return false;
        };
        if self.inner.local_user_id == Some(user_id) {
            return false;
        }

        let mut state = self.inner.state.lock().await;
        if update.is_typing {
            let deadline = Instant::now() + self.inner.timings.remote_typing_ttl;
            let inner = Arc::clone(&self.inner);
            state
                .typing_clears
                .entry(user_id)
                .or_default()
                .arm(deadline, move |generation| async move {
                    inner.clear_remote_typing(user_id, generation).await;
                });
        } else {
            state.typing_clears.remove(&user_id);
        }

        let changed = state.list.set_typing(user_id, update.is_typing);
        if changed {
            self.inner.publish(&state.list);
        }
        changed
    }

    /// Local read acknowledgment, sent when the user opens a conversation.
    pub async fn mark_read(&self, chat_id: ChatId) -> bool {
        let had_unread = {
            let mut state = self.inner.state.lock().await;
            let had_unread = state.list.get(chat_id).is_some_and(|c| c.unread_count > 0);
            if !state.list.apply_read_receipt(chat_id) {
                debug!(chat_id = chat_id.0, "sync: mark read for unknown conversation");
                return false;
            }
            if had_unread {
                self.inner.publish(&state.list);
            }
            had_unread
        };

        let acknowledger = Arc::clone(&self.inner.read_acknowledger);
        tokio::spawn(async move {
            if let Err(err) = acknowledger.acknowledge_read(chat_id).await {
                warn!(chat_id = chat_id.0, %err, "sync: read acknowledgment failed");
            }
        });
        had_unread
    }

    pub async fn refresh_presence(&self) {
        self.inner.refresh_presence().await;
    }

    pub async fn start_presence_refresh(&self) {
        let inner = Arc::clone(&self.inner);
        self.inner
            .presence
            .lock()
            .await
            .start(self.inner.timings.presence_refresh_interval, move || {
                let inner = Arc::clone(&inner);
                async move { inner.refresh_presence().await }
            });
    }

    pub async fn is_presence_refresh_running(&self) -> bool {
        self.inner.presence.lock().await.is_running()
    }

    /// Cancels the presence refresh and every pending typing auto-clear.
    pub async fn teardown(&self) {
        self.inner.presence.lock().await.stop();
        let mut state = self.inner.state.lock().await;
        state.typing_clears.clear();
    }
}

#[cfg(test)]
#[path = "tests/conversations_tests.rs"]
mod tests;

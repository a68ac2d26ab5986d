use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, Weak,
};

use anyhow::Result;
use media_integration::{LoopbackConnector, MeetingConnector, MissingMeetingConnector};
use shared::{
    domain::ChatId,
    protocol::{ConversationSummary, InboundEvent},
};
use tokio::{
    sync::{broadcast, broadcast::error::RecvError},
    task::AbortHandle,
};
use tracing::{debug, info, warn};

use crate::{
    backend::{
        BackendClient, MissingReadAcknowledger, MissingTypingNotifier, ReadAcknowledger,
        TypingNotifier,
    },
    call::CallController,
    config::Settings,
    conversations::ConversationSynchronizer,
    events::SessionEvent,
    token::{CallTokenProvider, MissingCallTokenProvider, StaticTokenProvider},
    typing::TypingIndicator,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Remote collaborators a [`MessagesSession`] talks to.
pub struct SessionDependencies {
    pub typing_notifier: Arc<dyn TypingNotifier>,
    pub read_acknowledger: Arc<dyn ReadAcknowledger>,
    pub token_provider: Arc<dyn CallTokenProvider>,
    pub meeting_connector: Arc<dyn MeetingConnector>,
}

impl SessionDependencies {
    pub fn missing() -> Self {
        Self {
            typing_notifier: Arc::new(MissingTypingNotifier),
            read_acknowledger: Arc::new(MissingReadAcknowledger),
            token_provider: Arc::new(MissingCallTokenProvider),
            meeting_connector: Arc::new(MissingMeetingConnector),
        }
    }

    /// HTTP collaborators against the configured backend. In call test mode
    /// without a call SDK, calls run against the loopback transport.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let backend = Arc::new(BackendClient::new(
            &settings.server_url,
            settings.api_token.clone(),
        )?);

        let (token_provider, meeting_connector): (
            Arc<dyn CallTokenProvider>,
            Arc<dyn MeetingConnector>,
        ) = if settings.uses_loopback_calls() {
            info!("session: call test mode, using loopback media transport");
            (
                Arc::new(StaticTokenProvider::loopback()),
                Arc::new(LoopbackConnector::default()),
            )
        } else {
            (backend.clone(), Arc::new(MissingMeetingConnector))
        };

        Ok(Self {
            typing_notifier: backend.clone(),
            read_acknowledger: backend,
            token_provider,
            meeting_connector,
        })
    }
}

/// Handle to an inbound event pump. Dropping it stops the pump.
#[must_use = "dropping a Subscription stops delivery"]
pub struct Subscription {
    handle: AbortHandle,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One messages page: the conversation list, the local typing indicator
/// and the call controller, wired to the same event stream.
pub struct MessagesSession {
    events: broadcast::Sender<SessionEvent>,
    conversations: ConversationSynchronizer,
    typing: TypingIndicator,
    call: CallController,
    pumps: Mutex<Vec<AbortHandle>>,
    torn_down: AtomicBool,
}

impl MessagesSession {
    /// Builds the session and starts the presence refresh.
    pub async fn start(
        settings: &Settings,
        snapshot: Vec<ConversationSummary>,
        deps: SessionDependencies,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let timings = settings.timings;

        let conversations = ConversationSynchronizer::new(
            snapshot,
            deps.read_acknowledger,
            events.clone(),
            settings.local_user_id,
            timings,
        );
        let typing = TypingIndicator::new(deps.typing_notifier, events.clone(), timings);
        let call = CallController::new(
            deps.token_provider,
            deps.meeting_connector,
            events.clone(),
            timings,
        );
        conversations.start_presence_refresh().await;

        let session = Arc::new(Self {
            events,
            conversations,
            typing,
            call,
            pumps: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
        });
        info!(
            conversations = session.conversations.snapshot().await.len(),
            "session: started"
        );
        session
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn conversations(&self) -> &ConversationSynchronizer {
        &self.conversations
    }

    pub fn typing(&self) -> &TypingIndicator {
        &self.typing
    }

    pub fn call(&self) -> &CallController {
        &self.call
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub async fn handle_inbound(&self, event: InboundEvent) {
        if self.is_torn_down() {
            return;
        }
        match event {
            InboundEvent::ConversationUpdated(update) => {
                self.conversations.apply_conversation_update(&update).await;
            }
            InboundEvent::MessageRead(receipt) => {
                self.conversations.apply_read_receipt(&receipt).await;
            }
            InboundEvent::UserTyping(update) => {
                self.conversations.apply_typing_event(&update).await;
            }
            InboundEvent::StartCall(request) => {
                // Setup waits on the token and transport; keep inbound delivery flowing.
                let call = self.call.clone();
                tokio::spawn(async move {
                    if let Err(err) = call.start_call(request).await {
                        debug!(%err, "session: inbound call request failed");
                    }
                });
            }
            InboundEvent::EndCall => {
                self.call.end_call().await;
            }
        }
    }

    /// Parses and applies one inbound event. Malformed payloads are dropped.
    pub async fn handle_inbound_json(&self, raw: &str) -> bool {
        match serde_json::from_str::<InboundEvent>(raw) {
            Ok(event) => {
                self.handle_inbound(event).await;
                true
            }
            Err(err) => {
                debug!(%err, "session: dropped malformed inbound event");
                false
            }
        }
    }

    /// Pumps events from `inbound` into the session until the returned
    /// subscription is dropped, the sender goes away or the session is torn down.
    pub fn attach_inbound(
        self: &Arc<Self>,
        mut inbound: broadcast::Receiver<InboundEvent>,
    ) -> Subscription {
        let session: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                let event = match inbound.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session: inbound events lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.handle_inbound(event).await;
            }
        });

        let handle = task.abort_handle();
        self.pumps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle.clone());
        if self.is_torn_down() {
            handle.abort();
        }
        Subscription { handle }
    }

    /// Opens a conversation: it becomes the typing target and is marked read.
    pub async fn select_conversation(&self, chat_id: Option<ChatId>) {
        if self.is_torn_down() {
            return;
        }
        self.typing.set_active_conversation(chat_id).await;
        if let Some(chat_id) = chat_id {
            self.conversations.mark_read(chat_id).await;
        }
    }

    pub async fn on_input(&self) {
        self.typing.on_input().await;
    }

    pub async fn on_submit(&self) {
        self.typing.on_submit().await;
    }

    pub async fn on_blur(&self) {
        self.typing.on_blur().await;
    }

    /// Stops every pump, timer and call. Safe to call more than once.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let pumps = std::mem::take(
            &mut *self
                .pumps
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for pump in pumps {
            pump.abort();
        }

        self.typing.teardown().await;
        self.conversations.teardown().await;
        self.call.shutdown().await;
        info!("session: torn down");
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;

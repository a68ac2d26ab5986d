//! Local typing indicator.
//!
//! [`TypingMachine`] is the pure debounce: a start is announced only after
//! the user has kept typing for the start delay, and a stop once they have
//! been quiet for the stop delay. [`TypingIndicator`] drives it with a
//! single timer and delivers the resulting signals to the backend in order.

use std::{sync::Arc, time::Duration};

use shared::domain::ChatId;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, warn};

use crate::{backend::TypingNotifier, config::Timings, events::SessionEvent, timer::TimerSlot};

/// How long teardown waits for queued start/stop signals to reach the backend.
pub const DISPATCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingPhase {
    Idle,
    PendingStart { start_at: Instant, stop_at: Instant },
    Typing { stop_at: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

impl TypingSignal {
    pub fn is_typing(self) -> bool {
        matches!(self, TypingSignal::Start)
    }
}

/// Outcome of one input to the machine: the signal to announce, if any,
/// and when the machine next needs to be woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingTransition {
    pub signal: Option<TypingSignal>,
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct TypingMachine {
    phase: TypingPhase,
    start_delay: Duration,
    stop_delay: Duration,
}

impl TypingMachine {
    pub fn new(start_delay: Duration, stop_delay: Duration) -> Self {
        Self {
            phase: TypingPhase::Idle,
            start_delay,
            stop_delay,
        }
    }

    pub fn phase(&self) -> TypingPhase {
        self.phase
    }

    pub fn is_typing(&self) -> bool {
        matches!(self.phase, TypingPhase::Typing { .. })
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            TypingPhase::Idle => None,
            TypingPhase::PendingStart { start_at, .. } => Some(start_at),
            TypingPhase::Typing { stop_at } => Some(stop_at),
        }
    }

    /// A keystroke. Never announces anything by itself.
    pub fn on_input(&mut self, now: Instant) -> TypingTransition {
        let stop_at = now + self.stop_delay;
        self.phase = match self.phase {
            TypingPhase::Idle => TypingPhase::PendingStart {
                start_at: now + self.start_delay,
                stop_at,
            },
            TypingPhase::PendingStart { start_at, .. } => {
                TypingPhase::PendingStart { start_at, stop_at }
            }
            TypingPhase::Typing { .. } => TypingPhase::Typing { stop_at },
        };
        self.quiet()
    }

    /// The timer fired. Applies every deadline that has passed by `now`.
    pub fn on_deadline(&mut self, now: Instant) -> TypingTransition {
        match self.phase {
            TypingPhase::Idle => self.quiet(),
            TypingPhase::PendingStart { stop_at, .. } if now >= stop_at => {
                self.phase = TypingPhase::Idle;
                self.quiet()
            }
            TypingPhase::PendingStart { start_at, stop_at } if now >= start_at => {
                self.phase = TypingPhase::Typing { stop_at };
                self.announce(TypingSignal::Start)
            }
            TypingPhase::Typing { stop_at } if now >= stop_at => self.finish(),
            TypingPhase::PendingStart { .. } | TypingPhase::Typing { .. } => self.quiet(),
        }
    }

    pub fn on_submit(&mut self) -> TypingTransition {
        self.finish()
    }

    pub fn on_blur(&mut self) -> TypingTransition {
        self.finish()
    }

    /// Back to idle, announcing a stop only if a start went out.
    pub fn finish(&mut self) -> TypingTransition {
        let was_typing = self.is_typing();
        self.phase = TypingPhase::Idle;
        TypingTransition {
            signal: was_typing.then_some(TypingSignal::Stop),
            deadline: None,
        }
    }

    fn quiet(&self) -> TypingTransition {
        TypingTransition {
            signal: None,
            deadline: self.next_deadline(),
        }
    }

    fn announce(&self, signal: TypingSignal) -> TypingTransition {
        TypingTransition {
            signal: Some(signal),
            deadline: self.next_deadline(),
        }
    }
}

type Outbound = mpsc::UnboundedSender<(ChatId, TypingSignal)>;

struct TypingState {
    machine: TypingMachine,
    active_chat: Option<ChatId>,
    timer: TimerSlot,
    outbound: Option<Outbound>,
}

struct TypingInner {
    state: Mutex<TypingState>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl TypingInner {
    fn apply(self: &Arc<Self>, state: &mut TypingState, transition: TypingTransition) {
        match transition.deadline {
            Some(deadline) => {
                let inner = Arc::clone(self);
                state.timer.arm(deadline, move |generation| async move {
                    inner.on_timer(generation).await;
                });
            }
            None => state.timer.cancel(),
        }

        let (Some(signal), Some(chat_id)) = (transition.signal, state.active_chat) else {
            return;
        };
        debug!(chat_id = chat_id.0, ?signal, "typing: announcing");
        if let Some(outbound) = &state.outbound {
            let _ = outbound.send((chat_id, signal));
        }
        let _ = self.events.send(SessionEvent::TypingAnnounced {
            chat_id,
            is_typing: signal.is_typing(),
        });
    }

    async fn on_timer(self: Arc<Self>, generation: u64) {
        let mut state = self.state.lock().await;
        if !state.timer.take_if_current(generation) {
            return;
        }
        let transition = state.machine.on_deadline(Instant::now());
        self.apply(&mut state, transition);
    }
}

async fn dispatch(
    notifier: Arc<dyn TypingNotifier>,
    mut outbound: mpsc::UnboundedReceiver<(ChatId, TypingSignal)>,
) {
    while let Some((chat_id, signal)) = outbound.recv().await {
        if let Err(err) = notifier.notify_typing(chat_id, signal.is_typing()).await {
            warn!(chat_id = chat_id.0, ?signal, %err, "typing: status update failed");
        }
    }
}

#[derive(Clone)]
pub struct TypingIndicator {
    inner: Arc<TypingInner>,
}

impl TypingIndicator {
    /// Must be called within a Tokio runtime; spawns the in-order dispatcher.
    pub fn new(
        notifier: Arc<dyn TypingNotifier>,
        events: broadcast::Sender<SessionEvent>,
        timings: Timings,
    ) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(notifier, rx));
        Self {
            inner: Arc::new(TypingInner {
                state: Mutex::new(TypingState {
                    machine: TypingMachine::new(
                        timings.typing_start_delay,
                        timings.typing_stop_delay,
                    ),
                    active_chat: None,
                    timer: TimerSlot::default(),
                    outbound: Some(outbound),
                }),
                dispatcher: Mutex::new(Some(dispatcher)),
                events,
            }),
        }
    }

    pub async fn active_conversation(&self) -> Option<ChatId> {
        self.inner.state.lock().await.active_chat
    }

    pub async fn is_typing(&self) -> bool {
        self.inner.state.lock().await.machine.is_typing()
    }

    /// Switches the conversation being typed into. An announced start for
    /// the previous conversation is closed with an immediate stop.
    pub async fn set_active_conversation(&self, chat_id: Option<ChatId>) {
        let mut state = self.inner.state.lock().await;
        if state.outbound.is_none() || state.active_chat == chat_id {
            return;
        }
        let transition = state.machine.finish();
        self.inner.apply(&mut state, transition);
        state.active_chat = chat_id;
    }

    pub async fn on_input(&self) {
        let mut state = self.inner.state.lock().await;
        if state.active_chat.is_none() {
            return;
        }
        let transition = state.machine.on_input(Instant::now());
        self.inner.apply(&mut state, transition);
    }

    pub async fn on_submit(&self) {
        let mut state = self.inner.state.lock().await;
        let transition = state.machine.on_submit();
        self.inner.apply(&mut state, transition);
    }

    pub async fn on_blur(&self) {
        let mut state = self.inner.state.lock().await;
        let transition = state.machine.on_blur();
        self.inner.apply(&mut state, transition);
    }

    /// Stops the indicator for good. Pending signals get up to
    /// [`DISPATCH_DRAIN_TIMEOUT`] to be delivered; nothing is sent afterwards.
    pub async fn teardown(&self) {
        {
            let mut state = self.inner.state.lock().await;
            let transition = state.machine.finish();
            self.inner.apply(&mut state, transition);
            state.active_chat = None;
            state.outbound = None;
        }
        let dispatcher = self.inner.dispatcher.lock().await.take();
        if let Some(mut dispatcher) = dispatcher {
            if tokio::time::timeout(DISPATCH_DRAIN_TIMEOUT, &mut dispatcher)
                .await
                .is_err()
            {
                warn!("typing: pending signals not delivered before teardown, dropping them");
                dispatcher.abort();
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;

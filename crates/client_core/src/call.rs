//! Audio/video call session controller.
//!
//! At most one call exists at a time. The controller never assumes a call
//! is up: `Ringing` is entered once the media transport hands back a
//! meeting, `Connected` once the meeting reports it was joined.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use media_integration::{
    MeetingConnector, MeetingEvent, MeetingOptions, MeetingSession, RemoteParticipant,
};
use serde::Serialize;
use shared::{
    domain::{CallKind, MediaKind},
    protocol::StartCallRequest,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::Timings,
    events::SessionEvent,
    timer::Ticker,
    token::{CallFailureCategory, CallTokenError, CallTokenProvider},
};

const NEW_MEETING: &str = "new";
const DEFAULT_PARTICIPANT_NAME: &str = "User";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    #[default]
    Idle,
    Ringing,
    Connected,
    Ended,
}

/// Track ids currently attached to the call's media elements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaBindings {
    pub local_video: Option<String>,
    pub remote_video: Option<String>,
    pub remote_audio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub phase: CallPhase,
    pub kind: Option<CallKind>,
    pub meeting_id: Option<String>,
    pub local_mic_enabled: bool,
    pub local_video_enabled: bool,
    pub remote_mic_enabled: bool,
    pub remote_video_enabled: bool,
    pub call_started_at: Option<DateTime<Utc>>,
    pub duration_display: String,
    pub participants: Vec<RemoteParticipant>,
    pub bindings: MediaBindings,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            phase: CallPhase::Idle,
            kind: None,
            meeting_id: None,
            local_mic_enabled: true,
            local_video_enabled: true,
            remote_mic_enabled: true,
            remote_video_enabled: true,
            call_started_at: None,
            duration_display: format_duration(0),
            participants: Vec::new(),
            bindings: MediaBindings::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Token(#[from] CallTokenError),
    #[error("media transport failed: {0}")]
    Connect(String),
    #[error("call setup was cancelled")]
    Cancelled,
}

impl CallError {
    pub fn category(&self) -> CallFailureCategory {
        match self {
            CallError::Token(err) => err.category(),
            CallError::Connect(_) | CallError::Cancelled => CallFailureCategory::Generic,
        }
    }

    pub fn user_message(&self, kind: CallKind) -> String {
        match self {
            CallError::Token(err) => err.user_message(kind),
            CallError::Connect(_) | CallError::Cancelled => {
                format!("Failed to start {} call: {self}", kind.label())
            }
        }
    }
}

/// Elapsed call time as zero-padded `mm:ss`.
pub fn format_duration(elapsed_secs: u64) -> String {
    format!("{:02}:{:02}", elapsed_secs / 60, elapsed_secs % 60)
}

#[derive(Default)]
struct CallState {
    snapshot: CallSnapshot,
    session: Option<Arc<dyn MeetingSession>>,
    // Bumped per call; events and ticks carrying an older value are stale.
    generation: u64,
    // A start is between its token request and the transport handing back a meeting.
    setup_pending: bool,
    closed: bool,
    started: Option<Instant>,
    ticker: Ticker,
    event_task: Option<JoinHandle<()>>,
}

struct CallInner {
    token_provider: Arc<dyn CallTokenProvider>,
    connector: Arc<dyn MeetingConnector>,
    state: Mutex<CallState>,
    events: broadcast::Sender<SessionEvent>,
    timings: Timings,
}

impl CallInner {
    fn publish(&self, snapshot: &CallSnapshot) {
        let _ = self
            .events
            .send(SessionEvent::CallStateChanged(snapshot.clone()));
    }

    fn fail(&self, kind: CallKind, err: &CallError) {
        let message = err.user_message(kind);
        error!(kind = kind.label(), category = ?err.category(), %err, "call: setup failed");
        let _ = self.events.send(SessionEvent::CallSetupFailed {
            category: err.category(),
            message,
        });
    }

    fn start_duration(self: &Arc<Self>, state: &mut CallState) {
        state.snapshot.call_started_at = Some(Utc::now());
        state.snapshot.duration_display = format_duration(0);
        state.started = Some(Instant::now());

        let inner = Arc::clone(self);
        let generation = state.generation;
        state
            .ticker
            .start(self.timings.call_tick_interval, move || {
                let inner = Arc::clone(&inner);
                async move { inner.tick(generation).await }
            });
    }

    async fn tick(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            return;
        }
        let Some(started) = state.started else {
            return;
        };
        let display = format_duration(started.elapsed().as_secs());
        if state.snapshot.duration_display == display {
            return;
        }
        state.snapshot.duration_display.clone_from(&display);
        let _ = self.events.send(SessionEvent::CallDurationTick { display });
    }

    /// Claims the pending setup for `generation`. False once it was cancelled.
    async fn finish_setup(&self, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        if state.generation != generation || !state.setup_pending {
            return false;
        }
        state.setup_pending = false;
        true
    }

    async fn end_call(&self) -> bool {
        let (session, event_task) = {
            let mut state = self.state.lock().await;
            let Some(session) = state.session.take() else {
                if !state.setup_pending {
                    return false;
                }
                state.setup_pending = false;
                state.generation = state.generation.wrapping_add(1);
                info!("call: setup cancelled");
                return true;
            };
            state.generation = state.generation.wrapping_add(1);
            state.ticker.stop();
            state.started = None;

            state.snapshot.phase = CallPhase::Ended;
            state.snapshot.bindings = MediaBindings::default();
            state.snapshot.participants.clear();
            self.publish(&state.snapshot);

            state.snapshot = CallSnapshot::default();
            self.publish(&state.snapshot);
            (session, state.event_task.take())
        };

        info!(meeting_id = %session.meeting_id(), "call: ended");
        if let Err(err) = session.leave().await {
            warn!(meeting_id = %session.meeting_id(), %err, "call: leave request failed");
        }
        // May be the task running this call; abort only takes effect at its next await.
        if let Some(task) = event_task {
            task.abort();
        }
        true
    }

    async fn on_meeting_event(self: &Arc<Self>, generation: u64, event: MeetingEvent) {
        if event == MeetingEvent::MeetingLeft {
            let current = self.state.lock().await.generation == generation;
            if current {
                self.end_call().await;
            }
            return;
        }

        let mut state = self.state.lock().await;
        if state.generation != generation || state.session.is_none() {
            return;
        }
        match event {
            MeetingEvent::MeetingJoined => {
                if state.snapshot.phase != CallPhase::Ringing {
                    return;
                }
                state.snapshot.phase = CallPhase::Connected;
                self.start_duration(&mut state);
                info!(meeting_id = ?state.snapshot.meeting_id, "call: connected");
            }
            MeetingEvent::ParticipantJoined(participant) => {
                let participants = &mut state.snapshot.participants;
                if participants
                    .iter()
                    .any(|p| p.participant_id == participant.participant_id)
                {
                    return;
                }
                participants.push(participant);
            }
            MeetingEvent::ParticipantLeft { participant_id } => {
                state
                    .snapshot
                    .participants
                    .retain(|p| p.participant_id != participant_id);
            }
            MeetingEvent::LocalStreamEnabled(stream) => {
                if stream.kind != MediaKind::Video {
                    return;
                }
                state.snapshot.bindings.local_video = Some(stream.track_id);
            }
            MeetingEvent::StreamChanged {
                participant_id,
                stream,
                enabled,
            } => {
                debug!(%participant_id, kind = ?stream.kind, enabled, "call: remote stream changed");
                let track = enabled.then_some(stream.track_id);
                match stream.kind {
                    MediaKind::Audio => {
                        state.snapshot.remote_mic_enabled = enabled;
                        state.snapshot.bindings.remote_audio = track;
                    }
                    MediaKind::Video => {
                        state.snapshot.remote_video_enabled = enabled;
                        state.snapshot.bindings.remote_video = track;
                    }
                }
            }
            MeetingEvent::MeetingLeft => return,
        }
        self.publish(&state.snapshot);
    }

    fn spawn_event_task(
        self: &Arc<Self>,
        generation: u64,
        session: &Arc<dyn MeetingSession>,
    ) -> JoinHandle<()> {
        let mut events = session.subscribe_events();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => inner.on_meeting_event(generation, event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "call: meeting events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[derive(Clone)]
pub struct CallController {
    inner: Arc<CallInner>,
}

impl CallController {
    pub fn new(
        token_provider: Arc<dyn CallTokenProvider>,
        connector: Arc<dyn MeetingConnector>,
        events: broadcast::Sender<SessionEvent>,
        timings: Timings,
    ) -> Self {
        Self {
            inner: Arc::new(CallInner {
                token_provider,
                connector,
                state: Mutex::new(CallState::default()),
                events,
                timings,
            }),
        }
    }

    pub async fn snapshot(&self) -> CallSnapshot {
        self.inner.state.lock().await.snapshot.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.session.is_some()
    }

    /// Starts a call, ending any call already in progress. Failures are
    /// also published as [`SessionEvent::CallSetupFailed`].
    pub async fn start_call(&self, request: StartCallRequest) -> Result<CallSnapshot, CallError> {
        self.inner.end_call().await;

        let generation = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(CallError::Cancelled);
            }
            state.generation = state.generation.wrapping_add(1);
            state.setup_pending = true;
            state.generation
        };

        let kind = request.kind;
        let meeting_id = request
            .meeting_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| NEW_MEETING.to_string());
        info!(kind = kind.label(), %meeting_id, recipient = ?request.recipient_id, "call: starting");

        let token = match self.inner.token_provider.fetch_token(&meeting_id).await {
            Ok(token) => token,
            Err(err) => {
                if !self.inner.finish_setup(generation).await {
                    return Err(CallError::Cancelled);
                }
                let err = CallError::from(err);
                self.inner.fail(kind, &err);
                return Err(err);
            }
        };
        if self.inner.state.lock().await.generation != generation {
            debug!(%meeting_id, "call: setup cancelled before connecting");
            return Err(CallError::Cancelled);
        }

        let options = MeetingOptions {
            meeting_id,
            token,
            participant_name: request
                .participant_name
                .unwrap_or_else(|| DEFAULT_PARTICIPANT_NAME.to_string()),
            mic_enabled: true,
            webcam_enabled: kind == CallKind::Video,
        };
        let webcam_enabled = options.webcam_enabled;
        let session = match self.inner.connector.connect(options).await {
            Ok(session) => session,
            Err(err) => {
                if !self.inner.finish_setup(generation).await {
                    return Err(CallError::Cancelled);
                }
                let err = CallError::Connect(err.to_string());
                self.inner.fail(kind, &err);
                return Err(err);
            }
        };

        let mut state = self.inner.state.lock().await;
        if state.generation != generation || !state.setup_pending {
            drop(state);
            info!(meeting_id = %session.meeting_id(), "call: setup cancelled, leaving meeting");
            if let Err(err) = session.leave().await {
                warn!(meeting_id = %session.meeting_id(), %err, "call: leave request failed");
            }
            return Err(CallError::Cancelled);
        }
        state.setup_pending = false;
        state.session = Some(Arc::clone(&session));
        let event_task = self.inner.spawn_event_task(generation, &session);
        if let Some(task) = state.event_task.replace(event_task) {
            task.abort();
        }
        state.ticker.stop();
        state.started = None;
        state.snapshot = CallSnapshot {
            phase: CallPhase::Ringing,
            kind: Some(kind),
            meeting_id: Some(session.meeting_id().to_string()),
            local_video_enabled: webcam_enabled,
            ..CallSnapshot::default()
        };
        self.inner.publish(&state.snapshot);
        info!(meeting_id = %session.meeting_id(), "call: ringing");
        Ok(state.snapshot.clone())
    }

    /// Flips the local microphone. Returns the new value, or `None` without a call.
    pub async fn toggle_mic(&self) -> Option<bool> {
        let (session, enabled) = {
            let mut state = self.inner.state.lock().await;
            let session = state.session.clone()?;
            state.snapshot.local_mic_enabled = !state.snapshot.local_mic_enabled;
            self.inner.publish(&state.snapshot);
            (session, state.snapshot.local_mic_enabled)
        };

        let result = if enabled {
            session.unmute_mic().await
        } else {
            session.mute_mic().await
        };
        if let Err(err) = result {
            warn!(enabled, %err, "call: microphone request failed");
        }
        Some(enabled)
    }

    /// Flips the local camera. Returns the new value, or `None` without a call.
    pub async fn toggle_video(&self) -> Option<bool> {
        let (session, enabled) = {
            let mut state = self.inner.state.lock().await;
            let session = state.session.clone()?;
            state.snapshot.local_video_enabled = !state.snapshot.local_video_enabled;
            self.inner.publish(&state.snapshot);
            (session, state.snapshot.local_video_enabled)
        };

        let result = if enabled {
            session.enable_webcam().await
        } else {
            session.disable_webcam().await
        };
        if let Err(err) = result {
            warn!(enabled, %err, "call: webcam request failed");
        }
        Some(enabled)
    }

    /// Restarts the duration clock from now. No-op without a call.
    pub async fn start_call_duration(&self) {
        let mut state = self.inner.state.lock().await;
        if state.session.is_none() {
            return;
        }
        self.inner.start_duration(&mut state);
        self.inner.publish(&state.snapshot);
    }

    /// Leaves the meeting and resets to idle. Returns false when there was
    /// no call to end.
    pub async fn end_call(&self) -> bool {
        self.inner.end_call().await
    }

    /// Ends any call, including one still being set up, and refuses new ones.
    pub async fn shutdown(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.end_call().await;
    }
}

#[cfg(test)]
#[path = "tests/call_tests.rs"]
mod tests;

//! In-process media transport used when no call SDK is configured.
//!
//! The loopback meeting confirms the join after a short delay and reports a
//! local video stream, which is enough to drive the call controller through
//! its whole lifecycle during development and in tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use shared::domain::MediaKind;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    MediaStream, MeetingConnector, MeetingEvent, MeetingOptions, MeetingRequest, MeetingSession,
};

const DEFAULT_JOIN_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_LOCAL_STREAM_DELAY: Duration = Duration::from_secs(2);

pub struct LoopbackConnector {
    join_delay: Duration,
    local_stream_delay: Duration,
    meetings: Mutex<Vec<Arc<LoopbackMeeting>>>,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::with_delays(DEFAULT_JOIN_DELAY, DEFAULT_LOCAL_STREAM_DELAY)
    }
}

impl LoopbackConnector {
    pub fn with_delays(join_delay: Duration, local_stream_delay: Duration) -> Self {
        Self {
            join_delay,
            local_stream_delay,
            meetings: Mutex::new(Vec::new()),
        }
    }

    pub fn last_meeting(&self) -> Option<Arc<LoopbackMeeting>> {
        self.meetings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }

    pub fn meeting_count(&self) -> usize {
        self.meetings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl MeetingConnector for LoopbackConnector {
    async fn connect(&self, options: MeetingOptions) -> anyhow::Result<Arc<dyn MeetingSession>> {
        info!(
            meeting_id = %options.meeting_id,
            mic = options.mic_enabled,
            webcam = options.webcam_enabled,
            "loopback: meeting initialized"
        );
        let meeting = LoopbackMeeting::start(options, self.join_delay, self.local_stream_delay);
        self.meetings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::clone(&meeting));
        Ok(meeting)
    }
}

pub struct LoopbackMeeting {
    options: MeetingOptions,
    events: broadcast::Sender<MeetingEvent>,
    requests: Mutex<Vec<MeetingRequest>>,
    join_task: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackMeeting {
    fn start(
        options: MeetingOptions,
        join_delay: Duration,
        local_stream_delay: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let meeting = Arc::new(Self {
            options,
            events,
            requests: Mutex::new(Vec::new()),
            join_task: Mutex::new(None),
        });

        let events = meeting.events.clone();
        let webcam_enabled = meeting.options.webcam_enabled;
        let meeting_id = meeting.options.meeting_id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(join_delay).await;
            debug!(%meeting_id, "loopback: meeting joined");
            let _ = events.send(MeetingEvent::MeetingJoined);

            if webcam_enabled {
                tokio::time::sleep(local_stream_delay).await;
                let _ = events.send(MeetingEvent::LocalStreamEnabled(MediaStream {
                    kind: MediaKind::Video,
                    track_id: format!("loopback:{meeting_id}:local-video"),
                }));
            }
        });
        *meeting
            .join_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);

        meeting
    }

    pub fn options(&self) -> &MeetingOptions {
        &self.options
    }

    /// Injects an event as if the remote side had produced it.
    pub fn emit(&self, event: MeetingEvent) {
        let _ = self.events.send(event);
    }

    pub fn requests(&self) -> Vec<MeetingRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, request: MeetingRequest) {
        debug!(meeting_id = %self.options.meeting_id, ?request, "loopback: request");
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
    }
}

#[async_trait]
impl MeetingSession for LoopbackMeeting {
    async fn mute_mic(&self) -> anyhow::Result<()> {
        self.record(MeetingRequest::MuteMic);
        Ok(())
    }

    async fn unmute_mic(&self) -> anyhow::Result<()> {
        self.record(MeetingRequest::UnmuteMic);
        Ok(())
    }

    async fn enable_webcam(&self) -> anyhow::Result<()> {
        self.record(MeetingRequest::EnableWebcam);
        Ok(())
    }

    async fn disable_webcam(&self) -> anyhow::Result<()> {
        self.record(MeetingRequest::DisableWebcam);
        Ok(())
    }

    async fn leave(&self) -> anyhow::Result<()> {
        self.record(MeetingRequest::Leave);
        if let Some(task) = self
            .join_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            task.abort();
        }
        Ok(())
    }

    fn meeting_id(&self) -> &str {
        &self.options.meeting_id
    }

    fn subscribe_events(&self) -> broadcast::Receiver<MeetingEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/loopback_tests.rs"]
mod tests;

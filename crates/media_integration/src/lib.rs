use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::MediaKind;
use tokio::sync::broadcast;

pub mod loopback;

pub use loopback::{LoopbackConnector, LoopbackMeeting};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingOptions {
    pub meeting_id: String,
    pub token: String,
    pub participant_name: String,
    pub mic_enabled: bool,
    pub webcam_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParticipant {
    pub participant_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStream {
    pub kind: MediaKind,
    pub track_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeetingEvent {
    MeetingJoined,
    MeetingLeft,
    ParticipantJoined(RemoteParticipant),
    ParticipantLeft {
        participant_id: String,
    },
    LocalStreamEnabled(MediaStream),
    StreamChanged {
        participant_id: String,
        stream: MediaStream,
        enabled: bool,
    },
}

/// Requests issued to a meeting, in the order they were made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingRequest {
    MuteMic,
    UnmuteMic,
    EnableWebcam,
    DisableWebcam,
    Leave,
}

#[async_trait]
pub trait MeetingSession: Send + Sync {
    async fn mute_mic(&self) -> anyhow::Result<()>;
    async fn unmute_mic(&self) -> anyhow::Result<()>;
    async fn enable_webcam(&self) -> anyhow::Result<()>;
    async fn disable_webcam(&self) -> anyhow::Result<()>;
    async fn leave(&self) -> anyhow::Result<()>;
    fn meeting_id(&self) -> &str;
    fn subscribe_events(&self) -> broadcast::Receiver<MeetingEvent>;
}

/// Initializes a meeting with an access token and asks the transport to join it.
/// Joining is confirmed later through [`MeetingEvent::MeetingJoined`].
#[async_trait]
pub trait MeetingConnector: Send + Sync {
    async fn connect(&self, options: MeetingOptions) -> anyhow::Result<Arc<dyn MeetingSession>>;
}

pub struct MissingMeetingConnector;

#[async_trait]
impl MeetingConnector for MissingMeetingConnector {
    async fn connect(&self, options: MeetingOptions) -> anyhow::Result<Arc<dyn MeetingSession>> {
        Err(anyhow::anyhow!(
            "media transport is unavailable for meeting {}",
            options.meeting_id
        ))
    }
}

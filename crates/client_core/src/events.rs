use serde::Serialize;
use shared::{domain::ChatId, protocol::ConversationSummary};

use crate::{call::CallSnapshot, token::CallFailureCategory};

/// Events published to the rendering layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    ConversationsChanged(Vec<ConversationSummary>),
    TypingAnnounced {
        chat_id: ChatId,
        is_typing: bool,
    },
    CallStateChanged(CallSnapshot),
    CallDurationTick {
        display: String,
    },
    /// A call could not be set up; `message` is meant for the user.
    CallSetupFailed {
        category: CallFailureCategory,
        message: String,
    },
}

pub mod backend;
pub mod call;
pub mod config;
pub mod conversations;
pub mod events;
pub mod presence;
pub mod session;
mod timer;
pub mod token;
pub mod typing;

pub use backend::{BackendClient, ReadAcknowledger, TypingNotifier};
pub use call::{CallController, CallError, CallPhase, CallSnapshot};
pub use config::{load_settings, load_settings_from, Settings, Timings};
pub use conversations::{ConversationFilter, ConversationList, ConversationSynchronizer};
pub use events::SessionEvent;
pub use session::{MessagesSession, SessionDependencies, Subscription};
pub use token::{CallFailureCategory, CallTokenError, CallTokenProvider, StaticTokenProvider};
pub use typing::{TypingIndicator, TypingMachine, TypingSignal};

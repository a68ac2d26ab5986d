use async_trait::async_trait;
use serde::Serialize;
use shared::domain::CallKind;
use thiserror::Error;

pub const LOOPBACK_CALL_TOKEN: &str = "mock_token_for_testing";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallTokenError {
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),
    #[error("Server error: {0}")]
    Server(String),
    #[error("{0}")]
    Rejected(String),
    #[error("Invalid token response from server")]
    InvalidResponse,
    #[error("token request failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallFailureCategory {
    ConfigurationMissing,
    ServerError,
    Generic,
}

impl CallTokenError {
    pub fn category(&self) -> CallFailureCategory {
        match self {
            CallTokenError::ConfigurationMissing(_) => CallFailureCategory::ConfigurationMissing,
            CallTokenError::Server(_) => CallFailureCategory::ServerError,
            CallTokenError::Rejected(_)
            | CallTokenError::InvalidResponse
            | CallTokenError::Transport(_) => CallFailureCategory::Generic,
        }
    }

    /// Alert text shown to the user when a call cannot be started.
    pub fn user_message(&self, kind: CallKind) -> String {
        match self.category() {
            CallFailureCategory::ConfigurationMissing => format!(
                "Calling is not configured. Please contact your administrator to set up {} calling.",
                kind.label()
            ),
            CallFailureCategory::ServerError => {
                "Server error occurred. Please try again or contact support.".to_string()
            }
            CallFailureCategory::Generic => {
                format!("Failed to start {} call: {self}", kind.label())
            }
        }
    }
}

#[async_trait]
pub trait CallTokenProvider: Send + Sync {
    async fn fetch_token(&self, meeting_id: &str) -> Result<String, CallTokenError>;
}

pub struct MissingCallTokenProvider;

#[async_trait]
impl CallTokenProvider for MissingCallTokenProvider {
    async fn fetch_token(&self, _meeting_id: &str) -> Result<String, CallTokenError> {
        Err(CallTokenError::ConfigurationMissing(
            "call token provider is unavailable".to_string(),
        ))
    }
}

/// Hands out a fixed token; paired with the loopback transport in test mode.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn loopback() -> Self {
        Self::new(LOOPBACK_CALL_TOKEN)
    }
}

#[async_trait]
impl CallTokenProvider for StaticTokenProvider {
    async fn fetch_token(&self, _meeting_id: &str) -> Result<String, CallTokenError> {
        Ok(self.token.clone())
    }
}

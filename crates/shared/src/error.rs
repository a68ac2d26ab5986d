use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStatus {
    Success,
    Error,
}

/// JSON envelope used by every backend API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status: ApiStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn is_success(&self) -> bool {
        self.status == ApiStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    pub error: Option<String>,
}

impl ApiError {
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.message.to_ascii_lowercase().contains(&needle)
            || self
                .error
                .as_deref()
                .is_some_and(|error| error.to_ascii_lowercase().contains(&needle))
    }
}

impl<T> From<ApiEnvelope<T>> for ApiError {
    fn from(value: ApiEnvelope<T>) -> Self {
        Self {
            message: value
                .message
                .unwrap_or_else(|| "request failed".to_string()),
            error: value.error,
        }
    }
}

//! HTTP collaborators of the messages page: typing status, read
//! acknowledgments and call tokens.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use shared::{
    domain::ChatId,
    error::{ApiEnvelope, ApiError},
    protocol::{CallTokenData, CallTokenRequest, TypingStatusRequest},
};
use tracing::error;
use url::Url;

use crate::token::{CallTokenError, CallTokenProvider};

const JSON_CONTENT_TYPE: &str = "application/json";
const BODY_LOG_PREFIX: usize = 200;
/// Upper bound for one backend request, connect through body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait TypingNotifier: Send + Sync {
    async fn notify_typing(&self, chat_id: ChatId, is_typing: bool) -> Result<()>;
}

#[async_trait]
pub trait ReadAcknowledger: Send + Sync {
    async fn acknowledge_read(&self, chat_id: ChatId) -> Result<()>;
}

pub struct MissingTypingNotifier;

#[async_trait]
impl TypingNotifier for MissingTypingNotifier {
    async fn notify_typing(&self, chat_id: ChatId, _is_typing: bool) -> Result<()> {
        Err(anyhow!("typing notifier is unavailable for chat {}", chat_id.0))
    }
}

pub struct MissingReadAcknowledger;

#[async_trait]
impl ReadAcknowledger for MissingReadAcknowledger {
    async fn acknowledge_read(&self, chat_id: ChatId) -> Result<()> {
        Err(anyhow!("read acknowledger is unavailable for chat {}", chat_id.0))
    }
}

pub struct BackendClient {
    http: Client,
    server_url: String,
    api_token: Option<String>,
}

impl BackendClient {
    pub fn new(server_url: &str, api_token: Option<String>) -> Result<Self> {
        Self::with_timeout(server_url, api_token, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        server_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let parsed = Url::parse(server_url)
            .with_context(|| format!("invalid server url: {server_url}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("server_url must start with http:// or https://"));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let request = self
            .http
            .post(format!("{}{path}", self.server_url))
            .header(header::ACCEPT, JSON_CONTENT_TYPE);
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl TypingNotifier for BackendClient {
    async fn notify_typing(&self, chat_id: ChatId, is_typing: bool) -> Result<()> {
        self.post("/api/v1/presence/typing")
            .json(&TypingStatusRequest { chat_id, is_typing })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl ReadAcknowledger for BackendClient {
    async fn acknowledge_read(&self, chat_id: ChatId) -> Result<()> {
        self.post(&format!("/api/v1/chats/{}/read", chat_id.0))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl CallTokenProvider for BackendClient {
    async fn fetch_token(&self, meeting_id: &str) -> Result<String, CallTokenError> {
        let response = self
            .post("/api/v1/video-call/token")
            .json(&CallTokenRequest {
                meeting_id: meeting_id.to_string(),
            })
            .send()
            .await
            .map_err(|err| CallTokenError::Transport(err.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|err| CallTokenError::Transport(err.to_string()))?;

        classify_token_response(status, content_type.as_deref(), &body)
    }
}

/// Maps a token endpoint response onto a token or a categorized failure.
pub fn classify_token_response(
    status: StatusCode,
    content_type: Option<&str>,
    body: &str,
) -> Result<String, CallTokenError> {
    let is_json = content_type.is_some_and(|value| value.contains(JSON_CONTENT_TYPE));
    if !is_json {
        let prefix: String = body.chars().take(BODY_LOG_PREFIX).collect();
        error!(%status, body = %prefix, "call: token endpoint returned non-JSON content");
        return Err(CallTokenError::Server(
            "API endpoint not responding correctly".to_string(),
        ));
    }

    let envelope: ApiEnvelope<CallTokenData> = serde_json::from_str(body).map_err(|err| {
        error!(%status, %err, "call: token endpoint returned malformed JSON");
        CallTokenError::Server("malformed token response".to_string())
    })?;

    if !status.is_success() || !envelope.is_success() {
        let failure = ApiError::from(envelope);
        return Err(if failure.mentions("configuration missing") || failure.mentions("not configured") {
            CallTokenError::ConfigurationMissing(failure.message)
        } else if status.is_server_error() {
            CallTokenError::Server(failure.message)
        } else {
            CallTokenError::Rejected(failure.message)
        });
    }

    envelope
        .data
        .and_then(|data| data.token)
        .filter(|token| !token.is_empty())
        .ok_or(CallTokenError::InvalidResponse)
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;

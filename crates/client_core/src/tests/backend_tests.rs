use std::sync::Arc;

use super::*;
use crate::token::CallFailureCategory;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode as AxumStatus},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct Recorded {
    typing: Arc<Mutex<Vec<(TypingStatusRequest, Option<String>)>>>,
    reads: Arc<Mutex<Vec<i64>>>,
    meetings: Arc<Mutex<Vec<String>>>,
}

async fn handle_typing(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(payload): Json<TypingStatusRequest>,
) -> Json<Value> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    recorded.typing.lock().await.push((payload, auth));
    Json(json!({"status": "success", "message": "Typing status updated successfully"}))
}

async fn handle_read(State(recorded): State<Recorded>, Path(chat_id): Path<i64>) -> Json<Value> {
    recorded.reads.lock().await.push(chat_id);
    Json(json!({"status": "success"}))
}

async fn handle_token(
    State(recorded): State<Recorded>,
    Json(payload): Json<CallTokenRequest>,
) -> impl IntoResponse {
    let meeting_id = payload.meeting_id.clone();
    recorded.meetings.lock().await.push(payload.meeting_id);
    if meeting_id == "stalled" {
        std::future::pending::<()>().await;
    }
    match meeting_id.as_str() {
        "unconfigured" => (
            AxumStatus::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "error",
                "message": "VideoSDK is not configured. Please set VIDEOSDK_API_KEY and VIDEOSDK_SECRET_KEY in your .env file.",
                "error": "Configuration missing"
            })),
        )
            .into_response(),
        "html" => (
            AxumStatus::OK,
            [("content-type", "text/html")],
            "<html>Server Error</html>",
        )
            .into_response(),
        _ => Json(json!({"status": "success", "data": {"token": "tok-123"}})).into_response(),
    }
}

async fn spawn_backend() -> (String, Recorded) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/api/v1/presence/typing", post(handle_typing))
        .route("/api/v1/chats/:chat_id/read", post(handle_read))
        .route("/api/v1/video-call/token", post(handle_token))
        .with_state(recorded.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), recorded)
}

#[test]
fn rejects_non_http_server_url() {
    assert!(BackendClient::new("ftp://example.com", None).is_err());
    assert!(BackendClient::new("not a url", None).is_err());
    let client = BackendClient::new("https://example.com/", None).expect("client");
    assert_eq!(client.server_url(), "https://example.com");
}

#[tokio::test]
async fn typing_status_is_posted_with_bearer_token() {
    let (server_url, recorded) = spawn_backend().await;
    let client = BackendClient::new(&server_url, Some("secret".into())).expect("client");

    client.notify_typing(ChatId(9), true).await.expect("start");
    client.notify_typing(ChatId(9), false).await.expect("stop");

    let typing = recorded.typing.lock().await;
    assert_eq!(typing.len(), 2);
    assert_eq!(typing[0].0.chat_id, ChatId(9));
    assert!(typing[0].0.is_typing);
    assert!(!typing[1].0.is_typing);
    assert_eq!(typing[0].1.as_deref(), Some("Bearer secret"));
}

#[tokio::test]
async fn read_acknowledgment_targets_chat_route() {
    let (server_url, recorded) = spawn_backend().await;
    let client = BackendClient::new(&server_url, None).expect("client");

    client.acknowledge_read(ChatId(31)).await.expect("read");

    assert_eq!(*recorded.reads.lock().await, vec![31]);
}

#[tokio::test]
async fn fetches_call_token() {
    let (server_url, recorded) = spawn_backend().await;
    let client = BackendClient::new(&server_url, None).expect("client");

    let token = client.fetch_token("new").await.expect("token");

    assert_eq!(token, "tok-123");
    assert_eq!(*recorded.meetings.lock().await, vec!["new".to_string()]);
}

#[tokio::test]
async fn missing_configuration_is_categorized() {
    let (server_url, _recorded) = spawn_backend().await;
    let client = BackendClient::new(&server_url, None).expect("client");

    let err = client.fetch_token("unconfigured").await.expect_err("must fail");
    assert_eq!(err.category(), CallFailureCategory::ConfigurationMissing);
}

#[tokio::test]
async fn html_error_page_is_a_server_error() {
    let (server_url, _recorded) = spawn_backend().await;
    let client = BackendClient::new(&server_url, None).expect("client");

    let err = client.fetch_token("html").await.expect_err("must fail");
    assert_eq!(err.category(), CallFailureCategory::ServerError);
}

#[tokio::test]
async fn unreachable_backend_is_generic_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let client = BackendClient::new(&format!("http://{addr}"), None).expect("client");

    let err = client.fetch_token("new").await.expect_err("must fail");
    assert!(matches!(err, CallTokenError::Transport(_)));
    assert_eq!(err.category(), CallFailureCategory::Generic);
}

#[tokio::test]
async fn stalled_token_endpoint_times_out_as_transport_failure() {
    let (server_url, recorded) = spawn_backend().await;
    let client = BackendClient::with_timeout(&server_url, None, Duration::from_millis(200))
        .expect("client");

    let err = tokio::time::timeout(Duration::from_secs(5), client.fetch_token("stalled"))
        .await
        .expect("request bounded by client timeout")
        .expect_err("must fail");

    assert!(matches!(err, CallTokenError::Transport(_)));
    assert_eq!(err.category(), CallFailureCategory::Generic);
    assert_eq!(*recorded.meetings.lock().await, vec!["stalled".to_string()]);
}

#[tokio::test]
async fn stalled_token_endpoint_surfaces_call_setup_failure() {
    use crate::{call::CallController, config::Timings, events::SessionEvent};
    use media_integration::LoopbackConnector;
    use shared::{domain::CallKind, protocol::StartCallRequest};

    let (server_url, _recorded) = spawn_backend().await;
    let client = BackendClient::with_timeout(&server_url, None, Duration::from_millis(200))
        .expect("client");
    let (events, mut rx) = tokio::sync::broadcast::channel(16);
    let controller = CallController::new(
        Arc::new(client),
        Arc::new(LoopbackConnector::default()),
        events,
        Timings::default(),
    );

    let request = StartCallRequest {
        meeting_id: Some("stalled".into()),
        participant_name: None,
        kind: CallKind::Video,
        recipient_id: None,
        recipient_name: None,
    };
    tokio::time::timeout(Duration::from_secs(5), controller.start_call(request))
        .await
        .expect("setup bounded by client timeout")
        .expect_err("must fail");

    assert!(matches!(
        rx.try_recv(),
        Ok(SessionEvent::CallSetupFailed {
            category: CallFailureCategory::Generic,
            ..
        })
    ));
    assert!(!controller.is_active().await);
}

#[test]
fn success_envelope_without_token_is_invalid() {
    let err = classify_token_response(
        StatusCode::OK,
        Some("application/json"),
        r#"{"status":"success","data":{}}"#,
    )
    .expect_err("must fail");
    assert_eq!(err, CallTokenError::InvalidResponse);
    assert_eq!(err.category(), CallFailureCategory::Generic);
}

#[test]
fn client_error_keeps_server_message() {
    let err = classify_token_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        Some("application/json; charset=utf-8"),
        r#"{"status":"error","message":"meeting_id is invalid"}"#,
    )
    .expect_err("must fail");
    assert_eq!(err, CallTokenError::Rejected("meeting_id is invalid".into()));
}

#[test]
fn server_error_json_is_categorized_as_server_error() {
    let err = classify_token_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        Some("application/json"),
        r#"{"status":"error","message":"Failed to generate token: boom"}"#,
    )
    .expect_err("must fail");
    assert_eq!(err.category(), CallFailureCategory::ServerError);
}

#[test]
fn missing_content_type_is_a_server_error() {
    let err = classify_token_response(StatusCode::OK, None, "{}").expect_err("must fail");
    assert_eq!(err.category(), CallFailureCategory::ServerError);
}

#[test]
fn user_messages_name_the_call_kind() {
    let config = CallTokenError::ConfigurationMissing("x".into());
    assert!(config
        .user_message(shared::domain::CallKind::Audio)
        .contains("audio calling"));

    let generic = CallTokenError::Rejected("meeting closed".into());
    assert_eq!(
        generic.user_message(shared::domain::CallKind::Video),
        "Failed to start video call: meeting closed"
    );
}

use std::{fs, io, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{load_settings_from, MessagesSession, SessionDependencies};
use serde::Deserialize;
use shared::{
    domain::ChatId,
    protocol::{ConversationSummary, InboundEvent},
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Replays a messages page script against a live session and prints every
/// session event as one JSON line.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = client_core::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// JSON array of conversation summaries to start from.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// JSON-lines script; reads stdin when omitted.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Run calls against the loopback media transport.
    #[arg(long)]
    test_mode: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ScriptStep {
    Inbound { event: InboundEvent },
    Select { chat_id: Option<ChatId> },
    Input,
    Submit,
    Blur,
    Wait { ms: u64 },
    ToggleMic,
    ToggleVideo,
    EndCall,
}

fn read_snapshot(path: Option<&PathBuf>) -> Result<Vec<ConversationSummary>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid snapshot {}", path.display()))
}

fn read_script(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display())),
        None => io::read_to_string(io::stdin()).context("failed to read script from stdin"),
    }
}

async fn run_step(session: &MessagesSession, step: ScriptStep) {
    match step {
        ScriptStep::Inbound { event } => session.handle_inbound(event).await,
        ScriptStep::Select { chat_id } => session.select_conversation(chat_id).await,
        ScriptStep::Input => session.on_input().await,
        ScriptStep::Submit => session.on_submit().await,
        ScriptStep::Blur => session.on_blur().await,
        ScriptStep::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        ScriptStep::ToggleMic => {
            session.call().toggle_mic().await;
        }
        ScriptStep::ToggleVideo => {
            session.call().toggle_video().await;
        }
        ScriptStep::EndCall => {
            session.call().end_call().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings_from(&args.config);
    if args.test_mode {
        settings.call_test_mode = true;
    }
    let snapshot = read_snapshot(args.snapshot.as_ref())?;
    let script = read_script(args.events.as_ref())?;
    let deps = SessionDependencies::from_settings(&settings)?;

    let session = MessagesSession::start(&settings, snapshot, deps).await;
    let mut events = session.subscribe_events();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(%err, "desktop: failed to encode session event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "desktop: event output lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    for (index, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<ScriptStep>(line) {
            Ok(step) => run_step(&session, step).await,
            Err(err) => warn!(line = index + 1, %err, "desktop: skipping invalid script step"),
        }
    }

    session.teardown().await;
    info!(
        unread = session.conversations().total_unread().await,
        "desktop: script finished"
    );
    drop(session);
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        warn!("desktop: event output did not drain");
    }
    Ok(())
}

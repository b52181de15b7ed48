//! End-to-end runner behaviour against the scripted provider.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;

use tl_domain::config::AgentConfig;
use tl_domain::error::Error;
use tl_domain::message::FALLBACK_REPLY;
use tl_domain::query::TurnRequest;
use tl_gateway::runtime::{Agent, CancelMap, Runner};
use tl_providers::{ScriptStep, ScriptedProvider, SummaryStep};
use tl_sessions::{JsonlStore, MemoryStore, PersistenceGateway};

fn runner_with(
    provider: Arc<ScriptedProvider>,
    store: Arc<dyn PersistenceGateway>,
    max_steps: u32,
) -> Runner {
    let cfg = AgentConfig {
        max_steps,
        ..AgentConfig::default()
    };
    let agent = Arc::new(Agent::from_config(&cfg, provider));
    Runner::new(agent, store, Arc::new(CancelMap::new()))
}

async fn seeded_store(session_id: &str) -> Arc<dyn PersistenceGateway> {
    let store: Arc<dyn PersistenceGateway> = Arc::new(MemoryStore::new());
    store
        .create_session_with_user("client-1", session_id, "Chat")
        .await
        .unwrap();
    store
}

async fn latest_turn(store: &Arc<dyn PersistenceGateway>, session_id: &str) -> u32 {
    store
        .get_session(session_id)
        .await
        .unwrap()
        .unwrap()
        .latest_turn_number
}

#[tokio::test]
async fn abandoned_stream_still_resolves_result() {
    let provider = Arc::new(ScriptedProvider::with_steps([ScriptStep::Text(
        "a fairly long reply streamed word by word".into(),
    )]));
    let store = seeded_store("s-1").await;
    let runner = runner_with(provider, store.clone(), 10);

    let (events, pending) =
        runner.run_stream(TurnRequest::new("client-1", "hello").in_session("s-1"));
    let mut events = Box::pin(events);
    let first = events.next().await.unwrap();
    assert!(first.starts_with("data: "));
    drop(events);

    let output = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output.session_id, "s-1");
    assert_eq!(output.messages[1].text(), "a fairly long reply streamed word by word");
    assert_eq!(latest_turn(&store, "s-1").await, 1);
}

#[tokio::test]
async fn cancel_mid_generation_persists_partial_pair() {
    let provider = Arc::new(ScriptedProvider::with_steps([ScriptStep::PartialThenHang(
        "half an ans".into(),
    )]));
    provider.push_summary(SummaryStep::Hang);
    let store = seeded_store("s-1").await;
    let runner = runner_with(provider, store.clone(), 10);

    let (events, pending) =
        runner.run_stream(TurnRequest::new("client-1", "explain").in_session("s-1"));
    let mut events = Box::pin(events);

    let mut frames = Vec::new();
    while let Some(frame) = events.next().await {
        let is_delta = frame.contains("\"type\":\"text-delta\"");
        frames.push(frame);
        if is_delta {
            assert!(runner.cancel_map().is_running("s-1"));
            assert!(runner.cancel_map().cancel("s-1"));
            break;
        }
    }
    while let Some(frame) = events.next().await {
        frames.push(frame);
    }

    let output = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output.messages.len(), 2);
    assert_eq!(output.messages[1].text(), "half an ans");
    assert_eq!(latest_turn(&store, "s-1").await, 1);
    assert!(!runner.cancel_map().is_running("s-1"));

    let n = frames.len();
    assert_eq!(frames[n - 1], "data: [DONE]\n\n");
    assert!(frames[n - 2].contains("\"type\":\"data-session\""));
}

#[tokio::test]
async fn step_limit_yields_fallback_not_error() {
    let tool = || ScriptStep::ToolCall {
        name: "clock".into(),
        input: json!({}),
        output: json!("noon"),
    };
    let provider = Arc::new(ScriptedProvider::with_steps([tool(), tool(), tool()]));
    let store = seeded_store("s-1").await;
    let runner = runner_with(provider, store.clone(), 2);

    let output = runner
        .run(TurnRequest::new("client-1", "loop forever").in_session("s-1"))
        .await
        .unwrap();

    assert_eq!(output.messages.len(), 2);
    assert_eq!(output.messages[0].text(), "loop forever");
    assert_eq!(output.messages[1].text(), FALLBACK_REPLY);
    assert_eq!(latest_turn(&store, "s-1").await, 1);
}

#[tokio::test]
async fn unknown_session_streams_error_event() {
    let provider = Arc::new(ScriptedProvider::new());
    let store: Arc<dyn PersistenceGateway> = Arc::new(MemoryStore::new());
    let runner = runner_with(provider.clone(), store, 10);

    let (events, pending) =
        runner.run_stream(TurnRequest::new("client-1", "hi").in_session("ghost"));
    let frames: Vec<String> = events.collect().await;

    assert_eq!(frames.len(), 2);
    assert!(frames[0].contains("\"type\":\"error\""));
    assert!(frames[0].contains("ghost"));
    assert_eq!(frames[1], "data: [DONE]\n\n");

    let err = pending.await.unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));
    assert_eq!(provider.response_calls(), 0);
    assert!(runner.cancel_map().is_empty());
}

#[tokio::test]
async fn turns_accumulate_on_disk_with_summary_backlink() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::with_steps([
        ScriptStep::Text("first answer".into()),
        ScriptStep::Text("second answer".into()),
    ]));
    provider.push_summary(SummaryStep::Keep);
    provider.push_summary(SummaryStep::Summary("user said hi twice".into()));

    let store: Arc<dyn PersistenceGateway> = Arc::new(JsonlStore::open(dir.path()).await.unwrap());
    let runner = runner_with(provider, store.clone(), 10);

    let first = runner.run(TurnRequest::new("client-1", "hi")).await.unwrap();
    let session_id = first.session_id.clone();
    assert_eq!(latest_turn(&store, &session_id).await, 1);

    let second = runner
        .run(TurnRequest::new("client-1", "hi again").in_session(&session_id))
        .await
        .unwrap();
    assert_eq!(latest_turn(&store, &session_id).await, 2);
    let summary = second.summary.unwrap();
    assert_eq!(summary.content(), "user said hi twice");
    assert!(summary.id().is_some());

    // A fresh store over the same directory sees both turns.
    let reopened = JsonlStore::open(dir.path()).await.unwrap();
    let messages = reopened.latest_messages(&session_id, 10).await.unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[3].turn_number, 2);
    let stored = reopened.latest_summary(&session_id).await.unwrap().unwrap();
    assert_eq!(stored.end_turn_number, 1);
}

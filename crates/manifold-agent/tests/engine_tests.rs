// Drive full reasoning sessions against a scripted LLM and a stub tool
// gateway, checking the event protocol the SSE bridge relies on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use manifold_agent::{run_session, EngineContext, LlmStream, PatternLibrary, ToolInvoker};
use manifold_bus::{EventBus, EventType, SessionEvent};
use manifold_core::config::{ConfigHandle, GatewayConfig};
use manifold_providers::StreamDelta;
use manifold_queue::{SessionTask, TaskQueue};
use manifold_router::{RouteError, RouteRequest};
use tokio::sync::mpsc;

/// Scripted LLM: pops the next canned response per call and streams it in
/// small chunks.
struct ScriptedLlm {
    responses: Mutex<Vec<Result<String, RouteError>>>,
}

impl ScriptedLlm {
    fn new(responses: Vec<Result<String, RouteError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait]
impl LlmStream for ScriptedLlm {
    async fn stream_chat(
        &self,
        _config: &GatewayConfig,
        _req: &RouteRequest,
        tx: mpsc::Sender<StreamDelta>,
    ) -> Result<String, RouteError> {
        let next = self.responses.lock().unwrap().remove(0);
        match next {
            Ok(text) => {
                // stream in 7-byte-ish chunks to exercise tag reassembly
                let chars: Vec<char> = text.chars().collect();
                for chunk in chars.chunks(7) {
                    let piece: String = chunk.iter().collect();
                    let _ = tx.send(StreamDelta::Text { text: piece }).await;
                }
                let _ = tx.send(StreamDelta::Done).await;
                Ok("stub-profile".to_string())
            }
            Err(e) => Err(e),
        }
    }
}

/// Stub tool gateway with canned per-tool results.
struct StubTools {
    results: HashMap<String, serde_json::Value>,
}

impl StubTools {
    fn new(results: HashMap<String, serde_json::Value>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl ToolInvoker for StubTools {
    async fn descriptors_json(&self) -> String {
        r#"[{"name":"web_search","summary":"Search the web","parameters":[]}]"#.to_string()
    }

    async fn invoke(&self, tool_name: &str, _arguments: &serde_json::Value) -> serde_json::Value {
        self.results
            .get(tool_name)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "error": 404, "detail": "unknown tool" }))
    }
}

fn context(
    llm: ScriptedLlm,
    tools: StubTools,
) -> (Arc<EngineContext>, Arc<EventBus>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let patterns_dir = dir.path().join("patterns");
    std::fs::create_dir_all(&patterns_dir).unwrap();
    std::fs::write(
        patterns_dir.join("basic_react.txt"),
        "Use <THOUGHT>, <ACTION>, <FINAL_ANSWER> tags.\n{{TOOLS}}",
    )
    .unwrap();
    let patterns = PatternLibrary::load(dir.path());

    let bus = Arc::new(EventBus::new());
    let ctx = Arc::new(EngineContext {
        config: Arc::new(ConfigHandle::new(GatewayConfig::default())),
        llm: Arc::new(llm),
        tools: Arc::new(tools),
        bus: bus.clone(),
        queue: Arc::new(TaskQueue::open_in_memory().unwrap()),
        patterns: Arc::new(patterns),
    });
    (ctx, bus, dir)
}

fn task(session_id: &str) -> SessionTask {
    SessionTask {
        session_id: session_id.to_string(),
        alias: "agent".to_string(),
        user_query: "capital of France and weather there".to_string(),
        reasoning_mode: None,
        client_system_instruction: None,
        client_manifests: Vec::new(),
        safety_flags: Vec::new(),
        enqueued_at: chrono::Utc::now().to_rfc3339(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// Drain all buffered events from a subscription after the session ended.
async fn drain(sub: &mut manifold_bus::SessionSubscription) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(Some(ev)) =
        tokio::time::timeout(std::time::Duration::from_millis(100), sub.recv()).await
    {
        let terminal = ev.event_type.is_terminal();
        events.push(ev);
        if terminal {
            break;
        }
    }
    events
}

fn kinds(events: &[SessionEvent]) -> Vec<EventType> {
    events.iter().map(|e| e.event_type).collect()
}

#[tokio::test]
async fn session_runs_tool_step_then_final_answer() {
    let llm = ScriptedLlm::new(vec![
        Ok(r#"<THOUGHT>search it</THOUGHT><ACTION>{"tool_name":"web_search","arguments":{"query":"capital of France"}}</ACTION>"#.to_string()),
        Ok("<THOUGHT>done</THOUGHT><FINAL_ANSWER>Paris</FINAL_ANSWER>".to_string()),
    ]);
    let tools = StubTools::new(HashMap::from([(
        "web_search".to_string(),
        serde_json::json!({ "results": [{ "title": "Paris" }] }),
    )]));
    let (ctx, bus, _dir) = context(llm, tools);

    let mut sub = bus.subscribe("s1");
    run_session(&ctx, &task("s1")).await;

    let events = drain(&mut sub).await;
    let ks = kinds(&events);

    assert_eq!(ks[0], EventType::WorkerAck);
    assert_eq!(*ks.last().unwrap(), EventType::FinalAnswerStreamEnd);

    // ordering: thought stream → thought end → tool start → observation →
    // tool end → second thought → final answer stream → final end
    let idx = |t: EventType| ks.iter().position(|k| *k == t).unwrap();
    assert!(idx(EventType::AgentThoughtStream) < idx(EventType::AgentThoughtEnd));
    assert!(idx(EventType::AgentThoughtEnd) < idx(EventType::AgentToolCallStart));
    assert!(idx(EventType::AgentToolCallStart) < idx(EventType::AgentObservation));
    assert!(idx(EventType::AgentObservation) < idx(EventType::AgentToolCallEnd));
    assert!(idx(EventType::AgentToolCallEnd) < idx(EventType::FinalAnswerStream));

    // proxy typewriter mode: thought arrives character by character
    let thought: String = events
        .iter()
        .filter(|e| e.event_type == EventType::AgentThoughtStream)
        .map(|e| e.payload["text"].as_str().unwrap().to_string())
        .collect::<Vec<_>>()
        .join("");
    assert!(thought.starts_with("search it"));
    let first_thought = events
        .iter()
        .find(|e| e.event_type == EventType::AgentThoughtStream)
        .unwrap();
    assert_eq!(first_thought.payload["text"].as_str().unwrap().chars().count(), 1);

    // final answer spells out through the stream frames
    let answer: String = events
        .iter()
        .filter(|e| e.event_type == EventType::FinalAnswerStream)
        .map(|e| e.payload["text"].as_str().unwrap().to_string())
        .collect::<Vec<_>>()
        .join("");
    assert_eq!(answer, "Paris");

    let start = events
        .iter()
        .find(|e| e.event_type == EventType::AgentToolCallStart)
        .unwrap();
    assert_eq!(start.payload["tool_name"], "web_search");
}

#[tokio::test]
async fn tool_error_becomes_observation_and_session_still_finishes() {
    let llm = ScriptedLlm::new(vec![
        Ok(r#"<THOUGHT>try the tool</THOUGHT><ACTION>{"tool_name":"web_search","arguments":{"query":"x"}}</ACTION>"#.to_string()),
        Ok("<FINAL_ANSWER>best effort</FINAL_ANSWER>".to_string()),
    ]);
    let tools = StubTools::new(HashMap::from([(
        "web_search".to_string(),
        serde_json::json!({ "error": 500, "detail": "backend down" }),
    )]));
    let (ctx, bus, _dir) = context(llm, tools);

    let mut sub = bus.subscribe("s1");
    run_session(&ctx, &task("s1")).await;

    let events = drain(&mut sub).await;
    let ks = kinds(&events);
    assert_eq!(*ks.last().unwrap(), EventType::FinalAnswerStreamEnd);

    let obs = events
        .iter()
        .find(|e| e.event_type == EventType::AgentObservation)
        .unwrap();
    assert_eq!(obs.payload["observation"]["error"], 500);
    // no `error` event anywhere: a tool failure is not a session failure
    assert!(!ks.contains(&EventType::Error));
}

#[tokio::test]
async fn reflective_pause_takes_another_step() {
    let llm = ScriptedLlm::new(vec![
        Ok("<THOUGHT>let me think</THOUGHT><ACTION></ACTION>".to_string()),
        Ok("<FINAL_ANSWER>42</FINAL_ANSWER>".to_string()),
    ]);
    let tools = StubTools::new(HashMap::new());
    let (ctx, bus, _dir) = context(llm, tools);

    let mut sub = bus.subscribe("s1");
    run_session(&ctx, &task("s1")).await;

    let events = drain(&mut sub).await;
    let ks = kinds(&events);
    assert_eq!(*ks.last().unwrap(), EventType::FinalAnswerStreamEnd);
    // no tool call happened on the pause step
    assert!(!ks.contains(&EventType::AgentToolCallStart));
    assert!(!ks.contains(&EventType::Error));
}

#[tokio::test]
async fn untagged_response_is_a_parse_failure() {
    let llm = ScriptedLlm::new(vec![Ok("I ignored your instructions".to_string())]);
    let tools = StubTools::new(HashMap::new());
    let (ctx, bus, _dir) = context(llm, tools);

    let mut sub = bus.subscribe("s1");
    run_session(&ctx, &task("s1")).await;

    let events = drain(&mut sub).await;
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert_eq!(last.payload["code"], "PARSE_FAILURE");
}

#[tokio::test]
async fn step_limit_terminates_with_error() {
    let mut config = GatewayConfig::default();
    config.agent_settings.max_steps = 2;

    let llm = ScriptedLlm::new(vec![
        Ok("<THOUGHT>hmm</THOUGHT><ACTION></ACTION>".to_string()),
        Ok("<THOUGHT>hmm again</THOUGHT><ACTION></ACTION>".to_string()),
    ]);
    let tools = StubTools::new(HashMap::new());
    let (ctx, bus, _dir) = context(llm, tools);
    ctx.config.replace(config);

    let mut sub = bus.subscribe("s1");
    run_session(&ctx, &task("s1")).await;

    let events = drain(&mut sub).await;
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert_eq!(last.payload["code"], "STEP_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn unknown_pattern_fails_the_session() {
    let llm = ScriptedLlm::new(vec![]);
    let tools = StubTools::new(HashMap::new());
    let (ctx, bus, _dir) = context(llm, tools);

    let mut sub = bus.subscribe("s1");
    let mut t = task("s1");
    t.reasoning_mode = Some("does_not_exist".to_string());
    run_session(&ctx, &t).await;

    let events = drain(&mut sub).await;
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert_eq!(last.payload["code"], "UNKNOWN_PATTERN");
}

#[tokio::test]
async fn exhausted_providers_emit_llm_unavailable() {
    let llm = ScriptedLlm::new(vec![Err(RouteError::NoProviderAvailable)]);
    let tools = StubTools::new(HashMap::new());
    let (ctx, bus, _dir) = context(llm, tools);

    let mut sub = bus.subscribe("s1");
    run_session(&ctx, &task("s1")).await;

    let events = drain(&mut sub).await;
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert_eq!(last.payload["code"], "LLM_UNAVAILABLE");
}

#[tokio::test]
async fn worker_pool_drains_the_queue() {
    let llm = ScriptedLlm::new(vec![
        Ok("<FINAL_ANSWER>one</FINAL_ANSWER>".to_string()),
        Ok("<FINAL_ANSWER>two</FINAL_ANSWER>".to_string()),
    ]);
    let tools = StubTools::new(HashMap::new());
    let (ctx, bus, _dir) = context(llm, tools);

    let mut sub_a = bus.subscribe("sa");
    let mut sub_b = bus.subscribe("sb");
    ctx.queue.enqueue(&task("sa")).unwrap();
    ctx.queue.enqueue(&task("sb")).unwrap();

    let cancel = tokio_util::sync::CancellationToken::new();
    let handles = manifold_agent::spawn_workers(ctx.clone(), cancel.clone());

    let events_a = drain_with_patience(&mut sub_a).await;
    let events_b = drain_with_patience(&mut sub_b).await;
    assert_eq!(
        events_a.last().unwrap().event_type,
        EventType::FinalAnswerStreamEnd
    );
    assert_eq!(
        events_b.last().unwrap().event_type,
        EventType::FinalAnswerStreamEnd
    );

    // acked: nothing pending, nothing claimable
    assert_eq!(ctx.queue.pending_count().unwrap(), 0);
    assert!(ctx.queue.claim("probe").unwrap().is_none());

    cancel.cancel();
    for h in handles {
        h.await.unwrap();
    }
}

/// Like `drain`, but waits long enough for a worker to pick the task up.
async fn drain_with_patience(
    sub: &mut manifold_bus::SessionSubscription,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(std::time::Duration::from_secs(5), sub.recv()).await {
            Ok(Some(ev)) => {
                let terminal = ev.event_type.is_terminal();
                events.push(ev);
                if terminal {
                    break;
                }
            }
            _ => break,
        }
    }
    events
}

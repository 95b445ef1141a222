use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use manifold_bus::{EventBus, EventType, SessionEvent};
use manifold_core::config::{ConfigHandle, GatewayConfig, TypewriterMode};
use manifold_providers::{RequestKind, StreamDelta};
use manifold_queue::{SessionTask, TaskQueue};
use manifold_router::{RouteError, RouteRequest, Router};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::parser::{ParseEvent, TagStreamParser};
use crate::prompt::{build_system_prompt, PatternLibrary, PromptSources};
use crate::scratchpad::{parse_action, Scratchpad};
use crate::toolclient::ToolInvoker;

/// Pattern used when neither the request nor the config names one.
const DEFAULT_PATTERN: &str = "basic_react";
/// How long an idle worker sleeps between queue polls.
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Claims older than this return to the queue (worker died mid-session).
const STALE_CLAIM_AGE: Duration = Duration::from_secs(15 * 60);
/// Cadence of the stale-claim sweep.
const REQUEUE_INTERVAL: Duration = Duration::from_secs(60);

/// The LLM call path, abstracted over the concrete router so the engine
/// can be driven with a scripted model in tests.
#[async_trait]
pub trait LlmStream: Send + Sync {
    async fn stream_chat(
        &self,
        config: &GatewayConfig,
        req: &RouteRequest,
        tx: mpsc::Sender<StreamDelta>,
    ) -> Result<String, RouteError>;
}

#[async_trait]
impl LlmStream for Router {
    async fn stream_chat(
        &self,
        config: &GatewayConfig,
        req: &RouteRequest,
        tx: mpsc::Sender<StreamDelta>,
    ) -> Result<String, RouteError> {
        self.route_stream(config, req, tx).await
    }
}

/// Shared dependencies for the worker pool.
pub struct EngineContext {
    pub config: Arc<ConfigHandle>,
    pub llm: Arc<dyn LlmStream>,
    pub tools: Arc<dyn ToolInvoker>,
    pub bus: Arc<EventBus>,
    pub queue: Arc<TaskQueue>,
    pub patterns: Arc<PatternLibrary>,
}

/// Spawn the reasoning worker pool plus the stale-claim sweeper. Workers
/// compete for tasks on the queue and stop when `cancel` fires.
pub fn spawn_workers(
    ctx: Arc<EngineContext>,
    cancel: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let worker_count = ctx.config.current().agent_settings.worker_count.max(1);
    let mut handles = Vec::with_capacity(worker_count + 1);

    for i in 0..worker_count {
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        let worker_id = format!("worker-{i}");
        handles.push(tokio::spawn(async move {
            info!(%worker_id, "reasoning worker started");
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match ctx.queue.claim(&worker_id) {
                    Ok(Some(claimed)) => {
                        let task = claimed.task;
                        let span = tracing::info_span!(
                            "session",
                            session_id = %task.session_id,
                            trace_id = %task.trace_id,
                            worker_id = %worker_id,
                        );
                        run_session(&ctx, &task).instrument(span).await;
                        if let Err(e) = ctx.queue.ack(&claimed.task_id) {
                            error!(task_id = %claimed.task_id, error = %e, "task ack failed");
                        }
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(POLL_INTERVAL) => {}
                        }
                    }
                    Err(e) => {
                        error!(%worker_id, error = %e, "queue claim failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(POLL_INTERVAL) => {}
                        }
                    }
                }
            }
            info!(%worker_id, "reasoning worker stopped");
        }));
    }

    // at-least-once: claims from dead workers return to pending
    {
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REQUEUE_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = ctx.queue.requeue_stale(STALE_CLAIM_AGE) {
                            error!(error = %e, "stale-claim requeue failed");
                        }
                    }
                }
            }
        }));
    }

    handles
}

/// Drive one reasoning session to a terminal event.
///
/// Every exit path publishes either `FinalAnswerStreamEnd` or an `error`
/// event; the caller acks the queue task afterwards.
pub async fn run_session(ctx: &EngineContext, task: &SessionTask) {
    let session_id = task.session_id.as_str();
    let config = ctx.config.current();
    let settings = &config.agent_settings;
    let typewriter = config.streaming_settings.typewriter_mode;

    ctx.bus
        .publish(session_id, SessionEvent::worker_ack(session_id))
        .await;

    let pattern_name = task
        .reasoning_mode
        .clone()
        .or_else(|| config.reasoning_mode(&task.alias))
        .unwrap_or_else(|| DEFAULT_PATTERN.to_string());

    let Some(pattern) = ctx.patterns.get(&pattern_name) else {
        warn!(pattern = %pattern_name, "unknown reasoning pattern");
        ctx.bus
            .publish(
                session_id,
                SessionEvent::error(
                    "UNKNOWN_PATTERN",
                    &format!("unknown reasoning pattern: {pattern_name}"),
                ),
            )
            .await;
        return;
    };

    let tools_json = ctx.tools.descriptors_json().await;
    let sources = PromptSources {
        client_system_instruction: task.client_system_instruction.clone(),
        client_manifests: task.client_manifests.clone(),
        server_system_instruction: settings.server_system_instruction.clone(),
        server_manifests: load_server_manifests(&config),
    };
    let system_prompt = build_system_prompt(pattern, &tools_json, &sources);

    let mut scratchpad = Scratchpad::new();

    for step in 0..settings.max_steps {
        let user_content = if scratchpad.is_empty() {
            task.user_query.clone()
        } else {
            format!("{}\n\n{}", task.user_query, scratchpad.render())
        };

        let route_req = RouteRequest {
            alias: task.alias.clone(),
            kind: RequestKind::Chat,
            body: serde_json::json!({
                "model": task.alias,
                "messages": [
                    { "role": "system", "content": system_prompt },
                    { "role": "user", "content": user_content },
                ],
            }),
        };

        let (tx, mut rx) = mpsc::channel::<StreamDelta>(64);
        let llm = ctx.llm.clone();
        let call_config = config.clone();
        let call = tokio::spawn(async move {
            llm.stream_chat(&call_config, &route_req, tx).await
        });

        let mut parser = TagStreamParser::new();
        let mut stream_error: Option<String> = None;

        while let Some(delta) = rx.recv().await {
            match delta {
                StreamDelta::Text { text } => {
                    for event in parser.push(&text) {
                        emit_parse_event(ctx, session_id, event, typewriter).await;
                    }
                }
                StreamDelta::Done => {}
                StreamDelta::Error { message } => {
                    stream_error = Some(message);
                }
            }
        }

        match call.await {
            Ok(Ok(profile_id)) => {
                debug!(step, profile_id = %profile_id, "llm step complete");
            }
            Ok(Err(e)) => {
                warn!(step, error = %e, "llm call failed");
                ctx.bus
                    .publish(
                        session_id,
                        SessionEvent::error(route_error_code(&e), &e.to_string()),
                    )
                    .await;
                return;
            }
            Err(e) => {
                error!(step, error = %e, "llm call task panicked");
                ctx.bus
                    .publish(
                        session_id,
                        SessionEvent::error("LLM_UNAVAILABLE", "internal failure in the llm call"),
                    )
                    .await;
                return;
            }
        }

        if let Some(message) = stream_error {
            warn!(step, %message, "upstream stream failed mid-response");
            ctx.bus
                .publish(session_id, SessionEvent::error("LLM_UNAVAILABLE", &message))
                .await;
            return;
        }

        if parser.saw_final() {
            info!(step, "session reached a final answer");
            ctx.bus
                .publish(
                    session_id,
                    SessionEvent::new(EventType::FinalAnswerStreamEnd, serde_json::json!({})),
                )
                .await;
            return;
        }

        match parser.action() {
            // reflective pause: record the thought, take another step
            Some("") => {
                debug!(step, "reflective pause");
                scratchpad.push(parser.thought().to_string(), None, None);
                continue;
            }
            Some(body) => {
                let action = match parse_action(body) {
                    Ok(a) => a,
                    Err(detail) => {
                        warn!(step, %detail, "unparsable action block");
                        ctx.bus
                            .publish(session_id, SessionEvent::error("PARSE_FAILURE", &detail))
                            .await;
                        return;
                    }
                };

                ctx.bus
                    .publish(
                        session_id,
                        SessionEvent::new(
                            EventType::AgentToolCallStart,
                            serde_json::json!({
                                "tool_name": action.tool_name,
                                "arguments": action.arguments,
                            }),
                        ),
                    )
                    .await;

                let observation = ctx.tools.invoke(&action.tool_name, &action.arguments).await;

                ctx.bus
                    .publish(
                        session_id,
                        SessionEvent::new(
                            EventType::AgentObservation,
                            serde_json::json!({ "observation": observation }),
                        ),
                    )
                    .await;

                scratchpad.push(
                    parser.thought().to_string(),
                    Some(action.clone()),
                    Some(observation),
                );

                ctx.bus
                    .publish(
                        session_id,
                        SessionEvent::new(
                            EventType::AgentToolCallEnd,
                            serde_json::json!({ "tool_name": action.tool_name }),
                        ),
                    )
                    .await;
            }
            None => {
                warn!(step, "response contained neither an action nor a final answer");
                ctx.bus
                    .publish(
                        session_id,
                        SessionEvent::error(
                            "PARSE_FAILURE",
                            "response contained neither an action nor a final answer",
                        ),
                    )
                    .await;
                return;
            }
        }
    }

    warn!(max_steps = settings.max_steps, "step limit exceeded");
    ctx.bus
        .publish(
            session_id,
            SessionEvent::error(
                "STEP_LIMIT_EXCEEDED",
                &format!("no final answer within {} steps", settings.max_steps),
            ),
        )
        .await;
}

fn route_error_code(e: &RouteError) -> &'static str {
    match e {
        RouteError::AliasNotFound { .. } => "ALIAS_NOT_FOUND",
        RouteError::RequestContent { .. } => "REQUEST_CONTENT_INVALID",
        RouteError::NoProviderAvailable => "LLM_UNAVAILABLE",
    }
}

/// Read the configured server manifest files (relative to `prompts_dir`).
/// Missing files are skipped with a warning.
fn load_server_manifests(config: &GatewayConfig) -> Vec<String> {
    let base = std::path::Path::new(&config.prompts_dir);
    config
        .agent_settings
        .server_manifests
        .iter()
        .filter_map(|rel| match std::fs::read_to_string(base.join(rel)) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(manifest = %rel, error = %e, "server manifest unreadable, skipping");
                None
            }
        })
        .collect()
}

async fn emit_parse_event(
    ctx: &EngineContext,
    session_id: &str,
    event: ParseEvent,
    typewriter: TypewriterMode,
) {
    match event {
        ParseEvent::ThoughtDelta(text) => {
            emit_text(ctx, session_id, EventType::AgentThoughtStream, &text, typewriter).await;
        }
        ParseEvent::ThoughtEnd => {
            ctx.bus
                .publish(
                    session_id,
                    SessionEvent::new(EventType::AgentThoughtEnd, serde_json::json!({})),
                )
                .await;
        }
        ParseEvent::FinalDelta(text) => {
            emit_text(ctx, session_id, EventType::FinalAnswerStream, &text, typewriter).await;
        }
        // the engine publishes FinalAnswerStreamEnd itself once the step
        // completes; ActionParsed is consumed from the parser afterwards
        ParseEvent::FinalAnswerEnd | ParseEvent::ActionParsed(_) => {}
    }
}

/// Proxy typewriter mode re-chunks text character by character; client
/// mode forwards deltas as they arrived.
async fn emit_text(
    ctx: &EngineContext,
    session_id: &str,
    event_type: EventType,
    text: &str,
    typewriter: TypewriterMode,
) {
    match typewriter {
        TypewriterMode::Proxy => {
            for ch in text.chars() {
                ctx.bus
                    .publish(
                        session_id,
                        SessionEvent::new(
                            event_type,
                            serde_json::json!({ "text": ch.to_string() }),
                        ),
                    )
                    .await;
            }
        }
        TypewriterMode::Client => {
            ctx.bus
                .publish(
                    session_id,
                    SessionEvent::new(event_type, serde_json::json!({ "text": text })),
                )
                .await;
        }
    }
}

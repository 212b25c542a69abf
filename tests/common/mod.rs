// Shared test helpers, not all items used by every test binary.
#![allow(unused)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchboard::config::Config;
use switchboard::{ConversationService, InMemoryCheckpointStore, build_router};
use switchboard_core::{
    AgentDescriptor, AgentInvoker, AgentReply, AgentRequest, CheckpointStore, ConversationState,
    JudgeRequest, Message, ResponseJudge, ToolCall, ToolExecutor, ToolOutput, TurnEvent,
    ValidationResult,
};
use switchboard_router::Router;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub agent: String,
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
    pub partner_guidelines: String,
    pub retry_instruction: Option<String>,
}

/// Replies queued per agent; an agent with nothing queued errors.
#[derive(Default)]
pub struct MockInvoker {
    replies: Mutex<HashMap<String, VecDeque<AgentReply>>>,
    pub calls: Mutex<Vec<RecordedInvocation>>,
}

impl MockInvoker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue(&self, agent: &str, replies: Vec<AgentReply>) {
        self.replies
            .lock()
            .unwrap()
            .entry(agent.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn recorded(&self) -> Vec<RecordedInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn recorded_for(&self, agent: &str) -> Vec<RecordedInvocation> {
        self.recorded()
            .into_iter()
            .filter(|c| c.agent == agent)
            .collect()
    }
}

#[async_trait]
impl AgentInvoker for MockInvoker {
    async fn invoke(&self, request: AgentRequest<'_>) -> Result<AgentReply> {
        self.calls.lock().unwrap().push(RecordedInvocation {
            agent: request.agent.name.clone(),
            messages: request.messages.clone(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
            partner_guidelines: request.partner_guidelines.clone(),
            retry_instruction: request.retry_instruction.clone(),
        });
        self.replies
            .lock()
            .unwrap()
            .get_mut(&request.agent.name)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("no reply queued for {}", request.agent.name))
    }
}

/// Domain tools: `failing` errors, `explode` panics, everything else
/// succeeds after an optional `delay_ms` argument.
#[derive(Default)]
pub struct RecordingTools {
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingTools {
    pub fn names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }
}

#[async_trait]
impl ToolExecutor for RecordingTools {
    async fn execute(&self, name: &str, arguments: &Value) -> ToolOutput {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        match name {
            "explode" => panic!("tool blew up"),
            "failing" => ToolOutput::error("listing service unavailable"),
            _ => {
                if let Some(ms) = arguments.get("delay_ms").and_then(Value::as_u64) {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                ToolOutput::ok(format!("{name} ok"))
            }
        }
    }
}

/// Verdicts in order, accepting once the queue is empty.
#[derive(Default)]
pub struct ScriptedJudge {
    verdicts: Mutex<VecDeque<Result<ValidationResult>>>,
    pub candidates: Mutex<Vec<String>>,
}

impl ScriptedJudge {
    pub fn new(verdicts: Vec<Result<ValidationResult>>) -> Arc<Self> {
        Arc::new(Self {
            verdicts: Mutex::new(verdicts.into()),
            candidates: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ResponseJudge for ScriptedJudge {
    async fn judge(&self, request: JudgeRequest<'_>) -> Result<ValidationResult> {
        self.candidates
            .lock()
            .unwrap()
            .push(request.candidate.to_string());
        self.verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ValidationResult::valid()))
    }
}

pub struct FailingStore;

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn load(&self, _thread_id: &str) -> Result<Option<ConversationState>> {
        Ok(None)
    }

    async fn save(&self, _thread_id: &str, _state: &ConversationState) -> Result<()> {
        Err(anyhow!("checkpoint backend offline"))
    }
}

// --- Reply builders ---

pub fn text(content: &str) -> AgentReply {
    AgentReply::text(content)
}

pub fn calls(calls: Vec<ToolCall>) -> AgentReply {
    AgentReply::calls(calls)
}

pub fn handoff(id: &str, target: &str, task: &str) -> ToolCall {
    ToolCall::new(
        id,
        format!("transfer_to_{target}"),
        json!({"task_description": task}),
    )
}

pub fn tool(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall::new(id, name, arguments)
}

// --- Wiring ---

/// Default agents (Broker, Concierge, Analyst) plus the suggestions spectator.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.agents.push(
        AgentDescriptor::new("suggestions", "Proposes follow-up questions").as_spectator(),
    );
    config
}

pub fn router_with_judge(
    config: &Config,
    invoker: Arc<dyn AgentInvoker>,
    tools: Arc<dyn ToolExecutor>,
    judge: Arc<dyn ResponseJudge>,
) -> Router {
    Router::new(
        config.router_settings(),
        Arc::new(config.build_registry().unwrap()),
        invoker,
        tools,
        judge,
    )
    .unwrap()
}

pub fn service_with(
    config: &Config,
    invoker: Arc<dyn AgentInvoker>,
    tools: Arc<dyn ToolExecutor>,
    judge: Arc<dyn ResponseJudge>,
    store: Arc<dyn CheckpointStore>,
) -> ConversationService {
    let router = router_with_judge(config, invoker, tools, judge);
    ConversationService::new(Arc::new(router), store, config.runtime.max_concurrent_turns)
}

pub async fn drain(mut rx: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

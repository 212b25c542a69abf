//! Deterministic collaborators driven by a JSON script.
//!
//! A script fixes every agent reply, tool output and (optionally) judge
//! verdict up front, so a whole conversation can be replayed through the
//! real service without a model behind it.

mod replay;

pub use replay::{ReplaySummary, replay};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use switchboard_core::{
    AgentInvoker, AgentReply, AgentRequest, JudgeRequest, ResponseJudge, ToolDefinition,
    ToolExecutor, ToolOutput, ValidationResult,
};
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptedTool {
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScriptedVerdict {
    /// The judge call itself fails.
    Error { error: String },
    Verdict(ValidationResult),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    #[serde(default)]
    pub thread_id: Option<String>,
    pub turns: Vec<String>,
    /// Replies per agent, consumed in order.
    #[serde(default)]
    pub replies: HashMap<String, Vec<AgentReply>>,
    #[serde(default)]
    pub tools: BTreeMap<String, ScriptedTool>,
    /// Replaces the configured judge when present.
    #[serde(default)]
    pub verdicts: Option<Vec<ScriptedVerdict>>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        let script: Script = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse script {}", path.display()))?;
        if script.turns.is_empty() {
            anyhow::bail!("script {} has no turns", path.display());
        }
        Ok(script)
    }
}

/// Pops the next scripted reply for whichever agent is invoked.
pub struct ScriptedInvoker {
    replies: Mutex<HashMap<String, VecDeque<AgentReply>>>,
}

impl ScriptedInvoker {
    pub fn new(replies: HashMap<String, Vec<AgentReply>>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|(agent, queue)| (agent, queue.into()))
                    .collect(),
            ),
        }
    }

    /// Replies not consumed yet, per agent.
    pub fn remaining(&self) -> BTreeMap<String, usize> {
        self.replies
            .lock()
            .map(|r| {
                r.iter()
                    .filter(|(_, q)| !q.is_empty())
                    .map(|(agent, q)| (agent.clone(), q.len()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, request: AgentRequest<'_>) -> Result<AgentReply> {
        let name = &request.agent.name;
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| anyhow!("scripted reply queue poisoned"))?;
        let reply = replies
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("no scripted reply left for agent {name}"))?;
        debug!(
            "scripted reply for {} ({} tool calls, retry={})",
            name,
            reply.tool_calls.len(),
            request.retry_instruction.is_some()
        );
        Ok(reply)
    }
}

pub struct ScriptedTools {
    tools: BTreeMap<String, ScriptedTool>,
}

impl ScriptedTools {
    pub fn new(tools: BTreeMap<String, ScriptedTool>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl ToolExecutor for ScriptedTools {
    async fn execute(&self, name: &str, _arguments: &Value) -> ToolOutput {
        match self.tools.get(name) {
            Some(t) if t.is_error => ToolOutput::error(t.content.clone()),
            Some(t) => ToolOutput::ok(t.content.clone()),
            None => ToolOutput::error(format!("Unknown tool: {name}")),
        }
    }

    fn definitions(&self, _agent: &str) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|(name, tool)| ToolDefinition {
                name: name.clone(),
                description: tool
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Scripted tool {name}")),
                parameters: json!({"type": "object"}),
            })
            .collect()
    }
}

/// Returns scripted verdicts in order, then accepts everything.
pub struct ScriptedJudge {
    verdicts: Mutex<VecDeque<ScriptedVerdict>>,
}

impl ScriptedJudge {
    pub fn new(verdicts: Vec<ScriptedVerdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
        }
    }
}

#[async_trait]
impl ResponseJudge for ScriptedJudge {
    async fn judge(&self, _request: JudgeRequest<'_>) -> Result<ValidationResult> {
        let next = self
            .verdicts
            .lock()
            .map_err(|_| anyhow!("scripted verdict queue poisoned"))?
            .pop_front();
        match next {
            Some(ScriptedVerdict::Error { error }) => Err(anyhow!(error)),
            Some(ScriptedVerdict::Verdict(v)) => Ok(v),
            None => Ok(ValidationResult::valid()),
        }
    }
}

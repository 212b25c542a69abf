//! Interfaces to the collaborators the router consumes but never implements:
//! model invocation, domain tools, response judgment, checkpoint storage and
//! background memory processing.

use crate::message::{Message, ToolCall, ToolDefinition};
use crate::registry::AgentDescriptor;
use crate::state::ConversationState;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;

/// Everything an agent implementation needs for one invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest<'a> {
    pub agent: &'a AgentDescriptor,
    pub messages: Vec<Message>,
    /// Domain tools followed by the agent's handoff tools.
    pub tools: Vec<ToolDefinition>,
    pub partner_guidelines: String,
    /// Ephemeral corrective instruction for a retry. Never part of the log.
    pub retry_instruction: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReply {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl AgentReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: AgentRequest<'_>) -> Result<AgentReply>;
}

/// Result of a domain tool. Failures are reported here, not as `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_data: Option<Value>,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            side_data: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            side_data: None,
        }
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: &Value) -> ToolOutput;

    /// Domain tools available to `agent`.
    fn definitions(&self, _agent: &str) -> Vec<ToolDefinition> {
        Vec::new()
    }
}

/// Recent transfer activity handed to the judge alongside a candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferContext {
    pub recent_targets: Vec<String>,
    pub chain: Vec<String>,
    pub simultaneous: Option<Vec<String>>,
    pub ping_pong: Option<String>,
}

impl TransferContext {
    pub fn is_empty(&self) -> bool {
        self.recent_targets.is_empty()
            && self.chain.is_empty()
            && self.simultaneous.is_none()
            && self.ping_pong.is_none()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.recent_targets.is_empty() {
            let _ = writeln!(
                out,
                "Recently transferred to: {}",
                self.recent_targets.join(", ")
            );
        }
        if let Some(targets) = &self.simultaneous {
            let _ = writeln!(
                out,
                "SIMULTANEOUS TRANSFER ALERT: attempted transfers to {} in one response",
                targets.join(", ")
            );
        }
        if let Some(pattern) = &self.ping_pong {
            let _ = writeln!(out, "PING-PONG ALERT: {pattern}");
        }
        if self.chain.len() > 1 {
            let _ = writeln!(out, "Transfer chain: {}", self.chain.join(" → "));
        }
        out
    }
}

pub struct JudgeRequest<'a> {
    pub candidate: &'a str,
    pub agent: &'a AgentDescriptor,
    pub conversation: &'a [Message],
    pub transfer: &'a TransferContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    #[serde(alias = "is_valid")]
    pub valid: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait ResponseJudge: Send + Sync {
    async fn judge(&self, request: JudgeRequest<'_>) -> Result<ValidationResult>;
}

/// Per-thread checkpoint persistence. The router reads at turn start and
/// writes at turn end, nothing in between.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>>;
    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<()>;
}

#[async_trait]
pub trait MemoryProcessor: Send + Sync {
    /// Consume a finalized snapshot. Must not assume it is the latest state.
    async fn process(&self, thread_id: &str, snapshot: &ConversationState) -> Result<()>;
}

#[cfg(test)]
mod tests;

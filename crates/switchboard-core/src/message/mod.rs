use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool invocation requested by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(rename = "id")]
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A tool the agent may call, as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One entry of the conversation log.
///
/// The log is append-only within a turn and its order is the only timeline
/// used for transfer history and validation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
    },
    Agent {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        tool_name: String,
        call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        side_data: Option<Value>,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn agent_text(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Agent {
            agent: agent.into(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn agent_calls(
        agent: impl Into<String>,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Message::Agent {
            agent: agent.into(),
            content,
            tool_calls,
        }
    }

    pub fn tool_result(
        tool_name: impl Into<String>,
        call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Message::ToolResult {
            tool_name: tool_name.into(),
            call_id: call_id.into(),
            content: content.into(),
            is_error,
            side_data: None,
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Message::Agent { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::ToolResult { .. })
    }

    /// Name of the agent that produced this message, if it is an agent message.
    pub fn agent_name(&self) -> Option<&str> {
        match self {
            Message::Agent { agent, .. } => Some(agent),
            _ => None,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Agent { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Text content of the message, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::User { content } | Message::ToolResult { content, .. } => Some(content),
            Message::Agent { content, .. } => content.as_deref(),
        }
    }
}

//! Handoff wire shape.
//!
//! A transfer is a tool call named `transfer_to_<agent>` with a single
//! `task_description` string argument. Every incoming call is classified
//! once, at the boundary, so routing logic branches on [`CallKind`] and
//! never on raw name prefixes.

use crate::message::{ToolCall, ToolDefinition};
use serde_json::{Value, json};

pub const HANDOFF_PREFIX: &str = "transfer_to_";
pub const TASK_DESCRIPTION_ARG: &str = "task_description";

#[derive(Debug, Clone, PartialEq)]
pub enum CallKind {
    Handoff {
        call_id: String,
        target: String,
        task_description: String,
    },
    Domain(ToolCall),
    /// A handoff-shaped call that cannot be honoured.
    Malformed { call: ToolCall, reason: String },
}

impl CallKind {
    /// Handoff attempts include malformed handoff calls; both count towards
    /// the one-transfer-per-reply rule.
    pub fn is_handoff_attempt(&self) -> bool {
        matches!(self, CallKind::Handoff { .. } | CallKind::Malformed { .. })
    }

    pub fn call_id(&self) -> &str {
        match self {
            CallKind::Handoff { call_id, .. } => call_id,
            CallKind::Domain(call) | CallKind::Malformed { call, .. } => &call.call_id,
        }
    }
}

pub fn tool_name(target: &str) -> String {
    format!("{HANDOFF_PREFIX}{target}")
}

/// Text of the tool result recorded for an accepted handoff.
pub fn accepted_text(target: &str) -> String {
    format!("Transferred to {target}.")
}

pub fn classify(call: &ToolCall) -> CallKind {
    let Some(target) = call.name.strip_prefix(HANDOFF_PREFIX) else {
        return CallKind::Domain(call.clone());
    };
    if target.trim().is_empty() {
        return malformed(call, "missing target agent name");
    }

    // Some providers deliver arguments as a JSON-encoded string.
    let parsed;
    let args = match &call.arguments {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(v) => {
                parsed = v;
                &parsed
            }
            Err(_) => return malformed(call, "arguments are not a JSON object"),
        },
        other => other,
    };

    match args.get(TASK_DESCRIPTION_ARG) {
        Some(Value::String(task)) if !task.trim().is_empty() => CallKind::Handoff {
            call_id: call.call_id.clone(),
            target: target.to_string(),
            task_description: task.clone(),
        },
        Some(Value::String(_)) => malformed(call, "task_description is empty"),
        Some(_) => malformed(call, "task_description must be a string"),
        None => malformed(call, "missing required argument task_description"),
    }
}

fn malformed(call: &ToolCall, reason: &str) -> CallKind {
    CallKind::Malformed {
        call: call.clone(),
        reason: reason.to_string(),
    }
}

/// Tool definition advertised to an agent for one of its partners.
pub fn definition(target: &str, description: &str) -> ToolDefinition {
    ToolDefinition {
        name: tool_name(target),
        description: format!("Transfer to {target}: {description}"),
        parameters: json!({
            "type": "object",
            "properties": {
                TASK_DESCRIPTION_ARG: {
                    "type": "string",
                    "description": "Complete, self-contained description of the task for the receiving agent, including every detail it needs"
                }
            },
            "required": [TASK_DESCRIPTION_ARG]
        }),
    }
}

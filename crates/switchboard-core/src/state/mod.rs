use crate::handoff::{self, CallKind};
use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_MAX_MESSAGES: usize = 30;
pub const DEFAULT_TRANSFER_WINDOW: usize = 10;

/// In-flight retry cycle for a rejected agent response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryContext {
    pub failed_attempt: String,
    pub feedback: String,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_guidance: Option<String>,
}

/// A completed handoff, derived from the message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub from_agent: String,
    pub to_agent: String,
    pub message_index: usize,
}

impl TransferRecord {
    pub fn new(from: impl Into<String>, to: impl Into<String>, message_index: usize) -> Self {
        Self {
            from_agent: from.into(),
            to_agent: to.into(),
            message_index,
        }
    }
}

/// A routing problem detected while handling tool calls that has not yet
/// been surfaced to validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferAlert {
    Loop { reason: String },
    Simultaneous { targets: Vec<String> },
}

/// Task description seeding the first dispatch of a handoff target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffSeed {
    pub from_agent: String,
    pub task_description: String,
    /// Log length when the handoff was accepted; the target sees only the
    /// seed plus what was appended after this point.
    pub log_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: String,
    pub messages: Vec<Message>,
    pub current_agent: String,
    #[serde(default)]
    pub retry_context: Option<RetryContext>,
    /// Rolling cache of the trailing transfers. Always rebuilt from
    /// `messages`, never edited independently.
    #[serde(default)]
    pub transfer_history: Vec<TransferRecord>,
    #[serde(default)]
    pub handoff_seed: Option<HandoffSeed>,
    #[serde(default)]
    pub alerts: Vec<TransferAlert>,
    #[serde(default)]
    pub loop_guidance: Option<String>,
    #[serde(default)]
    pub suggested_questions: Vec<String>,
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>, root_agent: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            current_agent: root_agent.into(),
            retry_context: None,
            transfer_history: Vec::new(),
            handoff_seed: None,
            alerts: Vec::new(),
            loop_guidance: None,
            suggested_questions: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild the transfer records from the trailing `window` agent turns.
    ///
    /// A record exists only for a handoff call whose tool result succeeded,
    /// so rejected handoffs and discarded retries never show up. Transfers
    /// touching an agent for which `excluded` returns true are skipped.
    pub fn derive_transfer_history(
        &self,
        window: usize,
        excluded: impl Fn(&str) -> bool,
    ) -> Vec<TransferRecord> {
        let start = self
            .messages
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, m)| m.is_agent())
            .nth(window.saturating_sub(1))
            .map_or(0, |(i, _)| i);

        let mut records = Vec::new();
        for (offset, message) in self.messages[start..].iter().enumerate() {
            let Some(from) = message.agent_name() else {
                continue;
            };
            // Only the results answering this message count; call ids may repeat
            // across turns.
            let index = start + offset;
            let accepted: HashSet<&str> = self.messages[index + 1..]
                .iter()
                .take_while(|m| m.is_tool_result())
                .filter_map(|m| match m {
                    Message::ToolResult {
                        tool_name,
                        call_id,
                        is_error: false,
                        ..
                    } if tool_name.starts_with(handoff::HANDOFF_PREFIX) => {
                        Some(call_id.as_str())
                    }
                    _ => None,
                })
                .collect();
            for call in message.tool_calls() {
                if let CallKind::Handoff {
                    call_id, target, ..
                } = handoff::classify(call)
                    && accepted.contains(call_id.as_str())
                    && !excluded(from)
                    && !excluded(&target)
                {
                    records.push(TransferRecord::new(from, target, index));
                }
            }
        }
        records
    }

    pub fn refresh_transfer_history(&mut self, window: usize, excluded: impl Fn(&str) -> bool) {
        self.transfer_history = self.derive_transfer_history(window, excluded);
    }

    /// Most recent error tool result within the last `window` messages.
    pub fn recent_tool_error(&self, window: usize) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .take(window)
            .find_map(|m| match m {
                Message::ToolResult {
                    content,
                    is_error: true,
                    ..
                } => Some(content.as_str()),
                _ => None,
            })
    }

    /// Trimmed copy of the log for handing to a model.
    pub fn trimmed_messages(&self, max_messages: usize) -> Vec<Message> {
        let mut messages = self.messages.clone();
        trim_log(&mut messages, max_messages);
        messages
    }

    pub fn trim_messages(&mut self, max_messages: usize) {
        trim_log(&mut self.messages, max_messages);
    }
}

/// Cap a log at `max_messages`, keeping the first message as an anchor and
/// dropping the oldest entries after it. Tool results left without their
/// originating agent message are dropped too.
pub fn trim_log(messages: &mut Vec<Message>, max_messages: usize) {
    let max_messages = max_messages.max(2);
    if messages.len() <= max_messages {
        return;
    }
    let excess = messages.len() - max_messages;
    messages.drain(1..=excess);
    while messages.len() > 1 && messages[1].is_tool_result() {
        messages.remove(1);
    }
}

#[cfg(test)]
mod tests;

//! Cross-cutting wrapper around every agent invocation.
//!
//! Agents themselves are opaque [`AgentInvoker`] implementations. The
//! envelope supplies what they all need: registry lookup of tools and
//! partner guidelines, the trimmed or handoff-seeded message view, and
//! the ephemeral retry instruction.

use crate::retry::corrective_instruction;
use std::sync::Arc;
use switchboard_core::state::trim_log;
use switchboard_core::{
    AgentDescriptor, AgentInvoker, AgentRegistry, AgentReply, AgentRequest, ConversationState,
    Message, SwitchboardError, ToolExecutor,
};
use tracing::debug;

pub struct AgentEnvelope {
    registry: Arc<AgentRegistry>,
    invoker: Arc<dyn AgentInvoker>,
    tools: Arc<dyn ToolExecutor>,
    max_messages: usize,
    retry_error_window: usize,
}

impl AgentEnvelope {
    pub fn new(
        registry: Arc<AgentRegistry>,
        invoker: Arc<dyn AgentInvoker>,
        tools: Arc<dyn ToolExecutor>,
        max_messages: usize,
        retry_error_window: usize,
    ) -> Self {
        Self {
            registry,
            invoker,
            tools,
            max_messages,
            retry_error_window,
        }
    }

    /// Messages the agent receives as input.
    ///
    /// A freshly handed-off agent sees only the task description plus what
    /// happened after the transfer; everyone else sees the trimmed log.
    pub fn input_messages(&self, state: &ConversationState) -> Vec<Message> {
        match &state.handoff_seed {
            Some(seed) => {
                let mut messages = Vec::with_capacity(state.messages.len() + 1);
                messages.push(Message::user(seed.task_description.clone()));
                messages.extend(state.messages.iter().skip(seed.log_index).cloned());
                trim_log(&mut messages, self.max_messages);
                messages
            }
            None => state.trimmed_messages(self.max_messages),
        }
    }

    pub fn build_request<'a>(
        &self,
        agent: &'a AgentDescriptor,
        state: &ConversationState,
    ) -> AgentRequest<'a> {
        let mut tools = self.tools.definitions(&agent.name);
        let partner_guidelines = if agent.spectator {
            String::new()
        } else {
            tools.extend(self.registry.handoff_tools(&agent.name));
            self.registry.partner_guidelines(&agent.name)
        };
        let retry_instruction = state.retry_context.as_ref().map(|ctx| {
            corrective_instruction(ctx, state.recent_tool_error(self.retry_error_window))
        });
        AgentRequest {
            agent,
            messages: self.input_messages(state),
            tools,
            partner_guidelines,
            retry_instruction,
        }
    }

    pub async fn execute(
        &self,
        agent: &AgentDescriptor,
        state: &ConversationState,
    ) -> Result<AgentReply, SwitchboardError> {
        let request = self.build_request(agent, state);
        debug!(
            "invoking agent {}: messages={}, tools={}, retry={}",
            agent.name,
            request.messages.len(),
            request.tools.len(),
            request.retry_instruction.is_some()
        );
        self.invoker
            .invoke(request)
            .await
            .map_err(|e| SwitchboardError::Invocation {
                agent: agent.name.clone(),
                message: format!("{e:#}"),
            })
    }
}

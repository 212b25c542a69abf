use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Write;
use std::sync::Arc;
use switchboard_core::{
    AgentDescriptor, AgentInvoker, AgentRequest, JudgeRequest, Message, ResponseJudge,
    ValidationResult,
};

/// Judge backed by a spectator agent run through the regular invoker.
pub struct InvokerJudge {
    invoker: Arc<dyn AgentInvoker>,
    validator: AgentDescriptor,
}

impl InvokerJudge {
    pub fn new(invoker: Arc<dyn AgentInvoker>, validator: AgentDescriptor) -> Self {
        Self { invoker, validator }
    }

    fn render_prompt(request: &JudgeRequest<'_>) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "AGENT UNDER REVIEW: {}", request.agent.name);
        let _ = writeln!(
            prompt,
            "AGENT INSTRUCTIONS:\n{}\n",
            request.agent.instructions
        );
        if !request.transfer.is_empty() {
            let _ = writeln!(prompt, "TRANSFER CONTEXT:\n{}", request.transfer.render());
        }
        prompt.push_str("RECENT CONVERSATION:\n");
        for message in request.conversation {
            match message {
                Message::User { content } => {
                    let _ = writeln!(prompt, "User: {content}");
                }
                Message::Agent {
                    agent,
                    content,
                    tool_calls,
                } => {
                    if let Some(text) = content {
                        let _ = writeln!(prompt, "{agent}: {text}");
                    }
                    for call in tool_calls {
                        let _ = writeln!(prompt, "{agent} called {}({})", call.name, call.arguments);
                    }
                }
                Message::ToolResult {
                    tool_name, content, ..
                } => {
                    let _ = writeln!(prompt, "[{tool_name}] {content}");
                }
            }
        }
        let _ = write!(
            prompt,
            "\nCANDIDATE RESPONSE:\n{}\n\n\
             Decide whether the candidate follows the agent instructions and is fit to show the user. \
             Reply with JSON only: {{\"is_valid\": true|false, \"reason\": \"...\"}}",
            request.candidate
        );
        prompt
    }
}

#[async_trait]
impl ResponseJudge for InvokerJudge {
    async fn judge(&self, request: JudgeRequest<'_>) -> Result<ValidationResult> {
        let prompt = Self::render_prompt(&request);
        let reply = self
            .invoker
            .invoke(AgentRequest {
                agent: &self.validator,
                messages: vec![Message::user(prompt)],
                tools: Vec::new(),
                partner_guidelines: String::new(),
                retry_instruction: None,
            })
            .await
            .with_context(|| format!("validator agent {} failed", self.validator.name))?;
        let content = reply
            .content
            .context("validator agent returned no content")?;
        parse_verdict(&content)
    }
}

/// Extract a [`ValidationResult`] from free-form model output.
pub fn parse_verdict(text: &str) -> Result<ValidationResult> {
    for (start, _) in text.char_indices().filter(|(_, c)| *c == '{') {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(value @ Value::Object(_))) = stream.next()
            && let Ok(result) = serde_json::from_value::<ValidationResult>(value)
        {
            return Ok(result);
        }
    }
    bail!("no validation verdict found in validator output")
}

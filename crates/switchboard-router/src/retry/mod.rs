//! Bounded re-execution of an agent after a rejected response.

use std::fmt::Write;
use switchboard_core::RetryContext;

pub const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-run the same agent with this context.
    Retry(RetryContext),
    /// Bound reached. The context is dropped and the response is accepted.
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryController {
    max_retries: u32,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryController {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Next step after the validator rejected `failed_attempt`.
    pub fn on_rejection(
        &self,
        current: Option<&RetryContext>,
        failed_attempt: &str,
        feedback: &str,
        loop_guidance: Option<&str>,
    ) -> RetryDecision {
        let count = current.map_or(0, |c| c.retry_count);
        if count >= self.max_retries {
            return RetryDecision::Exhausted { attempts: count };
        }
        RetryDecision::Retry(RetryContext {
            failed_attempt: failed_attempt.to_string(),
            feedback: feedback.to_string(),
            retry_count: count + 1,
            loop_guidance: loop_guidance.map(str::to_string),
        })
    }
}

/// Ephemeral instruction for the agent's next attempt.
///
/// The user never saw the rejected draft, so the new reply has to read as
/// the first one.
pub fn corrective_instruction(context: &RetryContext, recent_tool_error: Option<&str>) -> String {
    let mut out = String::from(
        "[Internal: Your previous draft was not delivered to the user and they have no knowledge of it.\n\n",
    );
    let _ = writeln!(out, "Reviewer notes: {}", context.feedback);
    if !context.failed_attempt.trim().is_empty() {
        let _ = writeln!(out, "\nWithheld draft:\n{}", context.failed_attempt);
    }
    if let Some(error) = recent_tool_error {
        let _ = writeln!(
            out,
            "\nRECENT TOOL ERROR: {error}\nUse a different approach or different arguments."
        );
    }
    if let Some(guidance) = &context.loop_guidance {
        let _ = writeln!(out, "\nTRANSFER GUIDANCE: {guidance}");
    }
    out.push_str(
        "\nWrite a completely new, natural response as a seamless continuation of the conversation. \
         Do NOT mention any previous attempt, draft or error. Do NOT apologize.]",
    );
    out
}

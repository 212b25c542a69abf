//! Decision policy wrapped around the external response judge.
//!
//! Deterministic pre-checks run first and short-circuit to invalid. The
//! judge is consulted only when none fire, and any failure of the judge
//! itself is treated as valid so a broken validator never blocks a
//! conversation.

mod judge;

pub use judge::{InvokerJudge, parse_verdict};

use crate::loop_detector::{LoopDetector, LoopVerdict, transfer_chain};
use crate::structured::{STRUCTURED_OUTPUT_REASON, contains_structured_block};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{
    AgentDescriptor, ConversationState, JudgeRequest, ResponseJudge, TransferAlert,
    TransferContext,
};
use tracing::{debug, warn};

pub const TRANSFER_HINT: &str =
    "Do NOT transfer back to recent agents. Execute your core function first.";
pub const EMPTY_REPLY_REASON: &str =
    "The response was empty. Answer the user directly or call one of your tools.";
const DEFAULT_FEEDBACK: &str = "The response does not follow the agent's instructions.";
pub const DEFAULT_CONTEXT_WINDOW: usize = 5;
pub const DEFAULT_JUDGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    PreCheck,
    Judge,
    FailOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub feedback: Option<String>,
    /// Transfer guidance to carry into the corrective instruction.
    pub guidance: Option<String>,
    pub source: VerdictSource,
}

impl ValidationOutcome {
    fn accepted(source: VerdictSource) -> Self {
        Self {
            valid: true,
            feedback: None,
            guidance: None,
            source,
        }
    }

    fn rejected(feedback: String, guidance: Option<String>, source: VerdictSource) -> Self {
        Self {
            valid: false,
            feedback: Some(feedback),
            guidance,
            source,
        }
    }
}

pub struct ValidationPolicy {
    judge: Arc<dyn ResponseJudge>,
    timeout: Duration,
    context_window: usize,
}

impl ValidationPolicy {
    pub fn new(judge: Arc<dyn ResponseJudge>) -> Self {
        Self {
            judge,
            timeout: DEFAULT_JUDGE_TIMEOUT,
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_context_window(mut self, window: usize) -> Self {
        self.context_window = window.max(1);
        self
    }

    /// Checks that need no external call. Returns the rejection reason.
    pub fn pre_check(candidate: &str, alerts: &[TransferAlert]) -> Option<String> {
        if candidate.trim().is_empty() {
            return Some(EMPTY_REPLY_REASON.to_string());
        }
        if contains_structured_block(candidate) {
            return Some(STRUCTURED_OUTPUT_REASON.to_string());
        }
        alerts.iter().find_map(|alert| match alert {
            TransferAlert::Loop { reason } => {
                Some(format!("TRANSFER LOOP DETECTED: {reason}. {TRANSFER_HINT}"))
            }
            TransferAlert::Simultaneous { targets } => Some(format!(
                "Invalid simultaneous transfers detected: Agent attempted to transfer to multiple agents simultaneously: {}. Only ONE transfer per response is allowed.",
                targets.join(", ")
            )),
        })
    }

    pub async fn evaluate(
        &self,
        candidate: &str,
        agent: &AgentDescriptor,
        state: &ConversationState,
        transfer: &TransferContext,
    ) -> ValidationOutcome {
        if let Some(reason) = Self::pre_check(candidate, &state.alerts) {
            debug!(
                "validation pre-check rejected response from {}: {}",
                agent.name, reason
            );
            return ValidationOutcome::rejected(reason, None, VerdictSource::PreCheck);
        }

        let start = state.messages.len().saturating_sub(self.context_window);
        let request = JudgeRequest {
            candidate,
            agent,
            conversation: &state.messages[start..],
            transfer,
        };

        let result = match tokio::time::timeout(self.timeout, self.judge.judge(request)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Self::fail_open(agent, &format!("{e:#}")),
            Err(_) => {
                return Self::fail_open(
                    agent,
                    &format!("timed out after {}s", self.timeout.as_secs_f64()),
                );
            }
        };

        if result.valid {
            return ValidationOutcome::accepted(VerdictSource::Judge);
        }

        let mut feedback = result
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FEEDBACK.to_string());
        let lowered = feedback.to_lowercase();
        let guidance = if lowered.contains("loop") || lowered.contains("transfer") {
            feedback.push_str("\n\nTRANSFER GUIDANCE: ");
            feedback.push_str(TRANSFER_HINT);
            Some(TRANSFER_HINT.to_string())
        } else {
            None
        };
        ValidationOutcome::rejected(feedback, guidance, VerdictSource::Judge)
    }

    fn fail_open(agent: &AgentDescriptor, error: &str) -> ValidationOutcome {
        warn!(
            "validator unavailable for agent {}: {}; accepting response",
            agent.name, error
        );
        counter!("switchboard_validator_fail_open_total").increment(1);
        ValidationOutcome::accepted(VerdictSource::FailOpen)
    }
}

/// Transfer activity shown to the judge.
pub fn transfer_context(state: &ConversationState, detector: &LoopDetector) -> TransferContext {
    let history = &state.transfer_history;

    let mut recent_targets: Vec<String> = Vec::new();
    for record in history.iter().rev().take(3) {
        if !recent_targets.contains(&record.to_agent) {
            recent_targets.push(record.to_agent.clone());
        }
    }

    let simultaneous = state.alerts.iter().find_map(|a| match a {
        TransferAlert::Simultaneous { targets } => Some(targets.clone()),
        TransferAlert::Loop { .. } => None,
    });

    let ping_pong = history.last().and_then(|last| {
        match detector.detect(&last.to_agent, &last.from_agent, history) {
            LoopVerdict::PingPong { reason } => Some(reason),
            _ => None,
        }
    });

    TransferContext {
        recent_targets,
        chain: transfer_chain(history),
        simultaneous,
        ping_pong,
    }
}

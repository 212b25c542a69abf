use crate::loop_detector::DEFAULT_LOOP_THRESHOLD;
use crate::retry::DEFAULT_MAX_RETRIES;
use crate::validation::{DEFAULT_CONTEXT_WINDOW, DEFAULT_JUDGE_TIMEOUT};
use std::time::Duration;
use switchboard_core::state::{DEFAULT_MAX_MESSAGES, DEFAULT_TRANSFER_WINDOW};

pub const DEFAULT_ROOT_AGENT: &str = "Broker";
pub const DEFAULT_MAX_STEPS: usize = 20;
pub const DEFAULT_RETRY_ERROR_WINDOW: usize = 5;

/// Tunables for one router instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSettings {
    pub root_agent: String,
    pub max_retries: u32,
    pub loop_threshold: usize,
    /// Agent turns scanned when deriving transfer history.
    pub transfer_window: usize,
    pub max_messages: usize,
    /// Agent invocations allowed per user turn.
    pub max_steps: usize,
    pub validator_timeout: Duration,
    pub retry_error_window: usize,
    pub validation_context_window: usize,
    /// Spectator agent run after each finalized turn to propose follow-ups.
    pub suggestions_agent: Option<String>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            root_agent: DEFAULT_ROOT_AGENT.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            loop_threshold: DEFAULT_LOOP_THRESHOLD,
            transfer_window: DEFAULT_TRANSFER_WINDOW,
            max_messages: DEFAULT_MAX_MESSAGES,
            max_steps: DEFAULT_MAX_STEPS,
            validator_timeout: DEFAULT_JUDGE_TIMEOUT,
            retry_error_window: DEFAULT_RETRY_ERROR_WINDOW,
            validation_context_window: DEFAULT_CONTEXT_WINDOW,
            suggestions_agent: None,
        }
    }
}

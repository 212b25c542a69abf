use thiserror::Error;

/// Typed errors for the switchboard crates.
///
/// Used at module boundaries (service, store, config) where callers need to
/// decide whether a turn can be committed. Leaf helpers use `anyhow::Result`
/// and convert through `Internal`.
#[derive(Debug, Error)]
pub enum SwitchboardError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("checkpoint store error for thread '{thread_id}': {message}")]
    Store { thread_id: String, message: String },

    #[error("agent '{agent}' invocation failed: {message}")]
    Invocation { agent: String, message: String },

    #[error("turn cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SwitchboardError {
    /// Whether the error aborts the turn without committing a checkpoint.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SwitchboardError::Store { .. } | SwitchboardError::Internal(_)
        )
    }

    pub fn store(thread_id: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SwitchboardError::Store {
            thread_id: thread_id.into(),
            message: err.to_string(),
        }
    }
}

/// Reasons a tool call is refused inside the router.
///
/// None of these ever reach the user. The `Display` text is what the
/// offending agent receives as the error tool result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingRejection {
    #[error(
        "Error: You are already the correct agent to handle this task. Please respond to the user directly."
    )]
    SelfTransfer,

    #[error(
        "Error: Only ONE transfer per response is allowed. You attempted to transfer to multiple agents simultaneously: {}.",
        .targets.join(", ")
    )]
    SimultaneousTransfer { targets: Vec<String> },

    #[error("Error: Transfer blocked. {reason}. Execute your own function instead of transferring.")]
    TransferLoop { reason: String },

    #[error("Error: There is no agent named '{target}' to transfer to.")]
    UnknownAgent { target: String },

    #[error("Error: {from} cannot transfer to {to}. Choose one of your listed partners.")]
    NotPartner { from: String, to: String },

    #[error("Error: '{target}' does not accept transfers.")]
    SpectatorTarget { target: String },

    #[error("Error: Malformed tool call '{name}': {reason}")]
    MalformedToolCall { name: String, reason: String },
}

impl RoutingRejection {
    /// Short label used for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            RoutingRejection::SelfTransfer => "self_transfer",
            RoutingRejection::SimultaneousTransfer { .. } => "simultaneous_transfer",
            RoutingRejection::TransferLoop { .. } => "transfer_loop",
            RoutingRejection::UnknownAgent { .. } => "unknown_agent",
            RoutingRejection::NotPartner { .. } => "not_partner",
            RoutingRejection::SpectatorTarget { .. } => "spectator_target",
            RoutingRejection::MalformedToolCall { .. } => "malformed_tool_call",
        }
    }
}

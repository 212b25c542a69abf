#![warn(clippy::pedantic)]
// Error sections are implied by the `Result` return types
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod errors;
pub mod events;
pub mod handoff;
pub mod message;
pub mod registry;
pub mod state;
pub mod traits;

pub use errors::{RoutingRejection, SwitchboardError};
pub use events::{EventSink, TurnEvent};
pub use handoff::{CallKind, HANDOFF_PREFIX, TASK_DESCRIPTION_ARG, classify};
pub use message::{Message, ToolCall, ToolDefinition};
pub use registry::{AgentDescriptor, AgentRegistry};
pub use state::{ConversationState, HandoffSeed, RetryContext, TransferAlert, TransferRecord};
pub use traits::{
    AgentInvoker, AgentReply, AgentRequest, CheckpointStore, JudgeRequest, MemoryProcessor,
    ResponseJudge, ToolExecutor, ToolOutput, TransferContext, ValidationResult,
};

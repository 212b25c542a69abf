#![warn(clippy::pedantic)]
// Error sections are implied by the `Result` return types
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
// Turn driver is a single state machine
#![allow(clippy::too_many_lines)]

pub mod envelope;
pub mod loop_detector;
pub mod retry;
pub mod router;
pub mod settings;
pub mod structured;
pub mod suggestions;
pub mod validation;

pub use envelope::AgentEnvelope;
pub use loop_detector::{LoopDetector, LoopVerdict};
pub use retry::{RetryController, RetryDecision};
pub use router::{CallDisposition, CallPlan, Router, TurnOutcome, TurnStatus, VerdictTransition};
pub use settings::RouterSettings;
pub use validation::{InvokerJudge, ValidationOutcome, ValidationPolicy, VerdictSource};

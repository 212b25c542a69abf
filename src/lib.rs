#![warn(clippy::pedantic)]
// Noisy doc/signature lints
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_name_repetitions)]

pub mod background;
pub mod cli;
pub mod config;
pub mod scripted;
pub mod service;
pub mod store;
pub(crate) mod utils;

pub use background::{MemoryWorker, TurnCompleted};
pub use config::{Config, load_config};
pub use service::{
    AcceptAllJudge, CancelHandle, CancelSignal, ConversationService, TurnReport, build_router,
    cancellation,
};
pub use store::{FileCheckpointStore, InMemoryCheckpointStore, open_store};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

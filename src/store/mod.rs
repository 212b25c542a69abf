//! Checkpoint stores for conversation state.
//!
//! Both backends reject stale writers: a save must carry exactly the
//! stored version plus one (a thread without a checkpoint counts as
//! version 0).

pub mod file;
pub mod memory;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

use crate::config::Config;
use anyhow::Result;
use std::sync::Arc;
use switchboard_core::CheckpointStore;
use tracing::info;

#[derive(Debug, thiserror::Error)]
#[error("stale checkpoint for thread '{thread_id}': stored version {stored}, got {incoming}")]
pub struct StaleCheckpoint {
    pub thread_id: String,
    pub stored: u64,
    pub incoming: u64,
}

pub(crate) fn check_version(
    thread_id: &str,
    stored: Option<u64>,
    incoming: u64,
) -> Result<(), StaleCheckpoint> {
    let stored = stored.unwrap_or(0);
    if incoming == stored + 1 {
        Ok(())
    } else {
        Err(StaleCheckpoint {
            thread_id: thread_id.to_string(),
            stored,
            incoming,
        })
    }
}

/// File store under `runtime.checkpointDir` when set, memory otherwise.
pub fn open_store(config: &Config) -> Result<Arc<dyn CheckpointStore>> {
    match config.checkpoint_path() {
        Some(dir) => {
            info!("checkpoints stored in {}", dir.display());
            Ok(Arc::new(FileCheckpointStore::new(
                dir,
                config.runtime.checkpoint_cache_size,
            )?))
        }
        None => {
            info!("checkpoints kept in memory");
            Ok(Arc::new(InMemoryCheckpointStore::new()))
        }
    }
}

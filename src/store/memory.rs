use super::check_version;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use switchboard_core::{CheckpointStore, ConversationState};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    threads: RwLock<HashMap<String, ConversationState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.threads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.threads.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<()> {
        let mut threads = self.threads.write().await;
        check_version(
            thread_id,
            threads.get(thread_id).map(|s| s.version),
            state.version,
        )?;
        threads.insert(thread_id.to_string(), state.clone());
        Ok(())
    }
}

use super::check_version;
use crate::utils::{atomic_write, ensure_dir, safe_filename};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use switchboard_core::{CheckpointStore, ConversationState};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const MIN_CACHE_SIZE: NonZeroUsize = NonZeroUsize::MIN;

/// One JSON document per thread.
///
/// The cache mutex is also the write lock: load-check-write happens under
/// it, so two saves for the same thread cannot both pass the version check.
pub struct FileCheckpointStore {
    dir: PathBuf,
    cache: Mutex<LruCache<String, ConversationState>>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let dir = ensure_dir(dir)?;
        Ok(Self {
            dir,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(cache_size).unwrap_or(MIN_CACHE_SIZE),
            )),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", safe_filename(thread_id)))
    }

    async fn read_disk(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        let path = self.path_for(thread_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read checkpoint {}", path.display()));
            }
        };
        let state: ConversationState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse checkpoint {}", path.display()))?;
        if state.thread_id != thread_id {
            // Two ids that sanitize to the same file name
            warn!(
                "checkpoint {} belongs to thread '{}', not '{}'",
                path.display(),
                state.thread_id,
                thread_id
            );
            anyhow::bail!(
                "checkpoint file {} is owned by another thread",
                path.display()
            );
        }
        Ok(Some(state))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        let mut cache = self.cache.lock().await;
        if let Some(state) = cache.get(thread_id) {
            return Ok(Some(state.clone()));
        }
        let loaded = self.read_disk(thread_id).await?;
        if let Some(state) = &loaded {
            cache.put(thread_id.to_string(), state.clone());
        }
        Ok(loaded)
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let stored = match cache.get(thread_id) {
            Some(s) => Some(s.version),
            None => self.read_disk(thread_id).await?.map(|s| s.version),
        };
        check_version(thread_id, stored, state.version)?;

        let path = self.path_for(thread_id);
        let content = serde_json::to_string_pretty(state)?;
        let write_path = path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&write_path, &content))
            .await
            .context("checkpoint writer task panicked")?
            .with_context(|| format!("Failed to write checkpoint {}", path.display()))?;

        cache.put(thread_id.to_string(), state.clone());
        debug!(
            "saved checkpoint for thread {} at version {}",
            thread_id, state.version
        );
        Ok(())
    }
}

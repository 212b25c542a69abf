//! Keyed registry of background jobs spawned by the conversation service.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type JobMap = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

#[derive(Clone, Default)]
pub struct TaskTracker {
    jobs: JobMap,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a job that drops its own entry when it finishes.
    pub async fn spawn_auto_cleanup<F>(&self, key: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let jobs = Arc::clone(&self.jobs);
        let own_key = key.clone();

        // The handle must be inserted before the job can remove itself.
        let mut guard = self.jobs.lock().await;
        let handle = tokio::spawn(async move {
            future.await;
            jobs.lock().await.remove(&own_key);
            debug!("background job '{}' finished", own_key);
        });
        if let Some(previous) = guard.insert(key.clone(), handle) {
            warn!("replacing background job '{}'", key);
            previous.abort();
        }
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Wait up to `grace` for every tracked job, then abort whatever is left.
    pub async fn drain(&self, grace: Duration) {
        let jobs: Vec<(String, JoinHandle<()>)> = self.jobs.lock().await.drain().collect();
        if jobs.is_empty() {
            return;
        }
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0usize;
        for (key, mut handle) in jobs {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                aborted += 1;
                debug!("aborted background job '{}' after grace period", key);
            }
        }
        if aborted > 0 {
            info!("aborted {} background jobs on shutdown", aborted);
        }
    }
}

//! Post-turn processing that must never block or fail a turn.

use crate::utils::task_tracker::TaskTracker;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{ConversationState, MemoryProcessor};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Snapshot of a committed turn, published after the checkpoint is saved.
#[derive(Debug, Clone)]
pub struct TurnCompleted {
    pub thread_id: String,
    pub snapshot: Arc<ConversationState>,
    pub completed_at: DateTime<Utc>,
}

impl TurnCompleted {
    pub fn new(state: ConversationState) -> Self {
        Self {
            thread_id: state.thread_id.clone(),
            snapshot: Arc::new(state),
            completed_at: Utc::now(),
        }
    }
}

pub fn queue(capacity: usize) -> (mpsc::Sender<TurnCompleted>, mpsc::Receiver<TurnCompleted>) {
    mpsc::channel(capacity.max(1))
}

/// Hands every completed turn to a [`MemoryProcessor`] in its own tracked task.
pub struct MemoryWorker {
    dispatcher: JoinHandle<()>,
    stop: watch::Sender<bool>,
    tasks: TaskTracker,
}

impl MemoryWorker {
    pub fn start(
        mut rx: mpsc::Receiver<TurnCompleted>,
        processor: Arc<dyn MemoryProcessor>,
    ) -> Self {
        let tasks = TaskTracker::new();
        let (stop, mut stop_rx) = watch::channel(false);
        let tracker = tasks.clone();

        let dispatcher = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => dispatch(&tracker, &processor, event).await,
                        None => break,
                    },
                    _ = stop_rx.changed() => {
                        rx.close();
                        while let Some(event) = rx.recv().await {
                            dispatch(&tracker, &processor, event).await;
                        }
                        break;
                    }
                }
            }
            debug!("memory worker dispatcher stopped");
        });

        info!("memory worker started");
        Self {
            dispatcher,
            stop,
            tasks,
        }
    }

    /// Snapshots currently being processed.
    pub async fn in_flight(&self) -> usize {
        self.tasks.len().await
    }

    /// Close the queue, process what was already queued, and wait for
    /// in-flight work up to a grace period.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.dispatcher.await {
            warn!("memory worker dispatcher ended abnormally: {}", e);
        }
        self.tasks.drain(SHUTDOWN_GRACE).await;
        info!("memory worker stopped");
    }
}

async fn dispatch(
    tracker: &TaskTracker,
    processor: &Arc<dyn MemoryProcessor>,
    event: TurnCompleted,
) {
    let processor = Arc::clone(processor);
    let key = format!("memory:{}:{}", event.thread_id, event.snapshot.version);
    tracker
        .spawn_auto_cleanup(key, async move {
            if let Err(e) = processor.process(&event.thread_id, &event.snapshot).await {
                error!(
                    "thread={}: memory processing failed for version {}: {:#}",
                    event.thread_id, event.snapshot.version, e
                );
            }
        })
        .await;
}

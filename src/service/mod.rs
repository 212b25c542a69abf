//! Turn execution with per-thread serialization, bounded concurrency,
//! cancellation and checkpointing.

mod cancel;

pub use cancel::{CancelHandle, CancelSignal, cancellation};

use crate::background::TurnCompleted;
use crate::config::Config;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_core::{
    AgentInvoker, CheckpointStore, ConversationState, EventSink, JudgeRequest, ResponseJudge,
    SwitchboardError, ToolExecutor, ValidationResult,
};
use switchboard_router::{InvokerJudge, Router, TurnStatus};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::{debug, info, warn};

/// Judge used when no validator agent is configured.
pub struct AcceptAllJudge;

#[async_trait]
impl ResponseJudge for AcceptAllJudge {
    async fn judge(&self, _request: JudgeRequest<'_>) -> Result<ValidationResult> {
        Ok(ValidationResult::valid())
    }
}

/// Router wired from configuration. The validator agent, when set, is
/// driven through the same invoker as every other agent.
pub fn build_router(
    config: &Config,
    invoker: Arc<dyn AgentInvoker>,
    tools: Arc<dyn ToolExecutor>,
) -> Result<Router, SwitchboardError> {
    let registry = Arc::new(config.build_registry()?);
    let judge: Arc<dyn ResponseJudge> = match &config.runtime.validator_agent {
        Some(name) => {
            let descriptor = registry.get(name).cloned().ok_or_else(|| {
                SwitchboardError::Config(format!(
                    "runtime.validatorAgent '{name}' is not registered"
                ))
            })?;
            Arc::new(InvokerJudge::new(invoker.clone(), descriptor))
        }
        None => Arc::new(AcceptAllJudge),
    };
    Router::new(config.router_settings(), registry, invoker, tools, judge)
}

/// What the caller gets back from a committed turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub thread_id: String,
    pub reply: String,
    pub status: TurnStatus,
    pub current_agent: String,
    pub version: u64,
    pub steps: usize,
    pub suggested_questions: Vec<String>,
}

pub struct ConversationService {
    router: Arc<Router>,
    store: Arc<dyn CheckpointStore>,
    permits: Arc<Semaphore>,
    threads: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    background: Option<mpsc::Sender<TurnCompleted>>,
}

impl ConversationService {
    pub fn new(
        router: Arc<Router>,
        store: Arc<dyn CheckpointStore>,
        max_concurrent_turns: usize,
    ) -> Self {
        Self {
            router,
            store,
            permits: Arc::new(Semaphore::new(max_concurrent_turns.max(1))),
            threads: Mutex::new(HashMap::new()),
            background: None,
        }
    }

    pub fn from_config(
        config: &Config,
        invoker: Arc<dyn AgentInvoker>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Result<Self, SwitchboardError> {
        let router = build_router(config, invoker, tools)?;
        let store = crate::store::open_store(config)?;
        Ok(Self::new(
            Arc::new(router),
            store,
            config.runtime.max_concurrent_turns,
        ))
    }

    /// Publish committed turns to a background queue.
    #[must_use]
    pub fn with_background(mut self, tx: mpsc::Sender<TurnCompleted>) -> Self {
        self.background = Some(tx);
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut threads = self.threads.lock().await;
        threads
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the per-thread lock once nobody else holds or waits on it.
    async fn release_thread(&self, thread_id: &str, lock: Arc<Mutex<()>>) {
        let mut threads = self.threads.lock().await;
        // One reference in the map, one here
        if Arc::strong_count(&lock) <= 2 {
            threads.remove(thread_id);
        }
    }

    /// Run one user turn for `thread_id`.
    ///
    /// Turns on the same thread run one at a time. The checkpoint is written
    /// exactly once when the router finishes; a cancelled turn writes
    /// nothing.
    pub async fn handle_turn(
        &self,
        thread_id: &str,
        text: &str,
        events: &EventSink,
        mut cancel: CancelSignal,
    ) -> Result<TurnReport, SwitchboardError> {
        let lock = self.thread_lock(thread_id).await;
        let result = {
            let guard = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                guard = lock.lock() => Some(guard),
            };
            match guard {
                Some(_guard) => self.run_locked(thread_id, text, events, &mut cancel).await,
                None => Err(SwitchboardError::Cancelled),
            }
        };
        self.release_thread(thread_id, lock).await;
        result
    }

    async fn run_locked(
        &self,
        thread_id: &str,
        text: &str,
        events: &EventSink,
        cancel: &mut CancelSignal,
    ) -> Result<TurnReport, SwitchboardError> {
        let _permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SwitchboardError::Cancelled),
            permit = self.permits.acquire() => permit
                .map_err(|e| SwitchboardError::Internal(anyhow::anyhow!("worker pool closed: {e}")))?,
        };

        let state = match self.store.load(thread_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!("thread={}: no checkpoint, starting fresh", thread_id);
                self.router.new_state(thread_id)
            }
            Err(e) => {
                warn!("thread={}: checkpoint load failed: {:#}", thread_id, e);
                return Err(SwitchboardError::store(thread_id, format!("{e:#}")));
            }
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("thread={}: turn cancelled, checkpoint untouched", thread_id);
                return Err(SwitchboardError::Cancelled);
            }
            outcome = self.router.run_turn(state, text, events) => outcome?,
        };

        let mut state = outcome.state;
        state.version += 1;
        state.updated_at = Utc::now();

        if let Err(e) = self.store.save(thread_id, &state).await {
            warn!(
                "thread={}: checkpoint save failed at version {}: {:#}",
                thread_id, state.version, e
            );
            return Err(SwitchboardError::store(thread_id, format!("{e:#}")));
        }

        let report = TurnReport {
            thread_id: thread_id.to_string(),
            reply: outcome.reply,
            status: outcome.status,
            current_agent: state.current_agent.clone(),
            version: state.version,
            steps: outcome.steps,
            suggested_questions: state.suggested_questions.clone(),
        };
        self.publish(state);

        info!(
            "thread={}: turn committed at version {} ({}, agent {})",
            thread_id,
            report.version,
            report.status.as_str(),
            report.current_agent
        );
        Ok(report)
    }

    fn publish(&self, state: ConversationState) {
        let Some(tx) = &self.background else {
            return;
        };
        let thread_id = state.thread_id.clone();
        match tx.try_send(TurnCompleted::new(state)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("thread={}: background queue full, snapshot dropped", thread_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("thread={}: background queue closed", thread_id);
            }
        }
    }
}

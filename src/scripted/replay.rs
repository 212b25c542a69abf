use super::{Script, ScriptedInvoker, ScriptedJudge, ScriptedTools};
use crate::background::{self, MemoryWorker};
use crate::config::Config;
use crate::service::{CancelSignal, ConversationService, build_router};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use switchboard_core::{ConversationState, EventSink, MemoryProcessor, TurnEvent};
use switchboard_router::Router;
use tokio::sync::mpsc;
use tracing::debug;

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    pub thread_id: String,
    pub turns: usize,
    pub failed_turns: usize,
    pub memory_snapshots: usize,
    /// Scripted replies that were never requested, per agent.
    pub unused_replies: BTreeMap<String, usize>,
}

/// Counts snapshots instead of extracting anything from them.
#[derive(Default)]
struct SnapshotCounter {
    seen: AtomicUsize,
}

#[async_trait]
impl MemoryProcessor for SnapshotCounter {
    async fn process(&self, thread_id: &str, snapshot: &ConversationState) -> Result<()> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        debug!(
            "thread={}: snapshot v{} with {} messages",
            thread_id,
            snapshot.version,
            snapshot.messages.len()
        );
        Ok(())
    }
}

async fn drain(mut rx: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Run every scripted turn through a full [`ConversationService`] and hand
/// each record (turn header, events, outcome) to `emit` as JSON.
pub async fn replay<F>(config: &Config, script: Script, mut emit: F) -> Result<ReplaySummary>
where
    F: FnMut(Value),
{
    let invoker = Arc::new(ScriptedInvoker::new(script.replies));
    let tools = Arc::new(ScriptedTools::new(script.tools));

    let router = match script.verdicts {
        Some(verdicts) => Router::new(
            config.router_settings(),
            Arc::new(config.build_registry()?),
            invoker.clone(),
            tools,
            Arc::new(ScriptedJudge::new(verdicts)),
        )?,
        None => build_router(config, invoker.clone(), tools)?,
    };

    let store = crate::store::open_store(config)?;
    let (tx, rx) = background::queue(config.runtime.background_queue_size);
    let counter = Arc::new(SnapshotCounter::default());
    let worker = MemoryWorker::start(rx, counter.clone());
    let service = ConversationService::new(
        Arc::new(router),
        store,
        config.runtime.max_concurrent_turns,
    )
    .with_background(tx);

    let thread_id = script
        .thread_id
        .unwrap_or_else(|| format!("replay-{}", uuid::Uuid::new_v4()));
    let mut summary = ReplaySummary {
        thread_id: thread_id.clone(),
        ..Default::default()
    };

    for (index, text) in script.turns.iter().enumerate() {
        emit(json!({"turn": index + 1, "user": text}));

        let (sink, rx) = EventSink::channel(EVENT_BUFFER);
        let service_ref = &service;
        let thread = thread_id.as_str();
        let run = async move {
            let result = service_ref
                .handle_turn(thread, text, &sink, CancelSignal::never())
                .await;
            drop(sink);
            result
        };
        let (result, events) = tokio::join!(run, drain(rx));

        for event in events {
            emit(serde_json::to_value(&event)?);
        }
        summary.turns += 1;
        match result {
            Ok(report) => emit(json!({
                "reply": report.reply,
                "status": report.status.as_str(),
                "agent": report.current_agent,
                "version": report.version,
                "steps": report.steps,
                "suggestions": report.suggested_questions,
            })),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                summary.failed_turns += 1;
                emit(json!({"error": e.to_string()}));
            }
        }
    }

    drop(service);
    worker.shutdown().await;
    summary.memory_snapshots = counter.seen.load(Ordering::SeqCst);
    summary.unused_replies = invoker.remaining();
    Ok(summary)
}

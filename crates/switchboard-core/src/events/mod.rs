use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Ordered per-turn events for a presentation layer.
///
/// `ValidationFailed` may be emitted for responses the user never sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    ToolStart {
        name: String,
        input: Value,
        call_id: String,
    },
    ToolEnd {
        name: String,
        output: String,
        call_id: String,
    },
    LlmMessage {
        content: String,
    },
    ValidationFailed {
        feedback: String,
    },
    Handoff {
        from: String,
        to: String,
    },
    Suggestions {
        questions: Vec<String>,
    },
}

/// Sending half of a turn's event stream. A dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<TurnEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything.
    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TurnEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub async fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.tx
            && tx.send(event).await.is_err()
        {
            debug!("event receiver dropped, discarding turn event");
        }
    }
}

mod common;

use common::{
    MockInvoker, RecordingTools, ScriptedJudge, calls, handoff, service_with, test_config, text,
    tool,
};
use serde_json::json;
use std::sync::Arc;
use switchboard::{CancelSignal, InMemoryCheckpointStore};
use switchboard_core::handoff::accepted_text;
use switchboard_core::{CheckpointStore, ConversationState, EventSink, Message, TurnEvent};
use switchboard_router::TurnStatus;

struct Harness {
    invoker: Arc<MockInvoker>,
    tools: Arc<RecordingTools>,
    store: Arc<InMemoryCheckpointStore>,
    service: switchboard::ConversationService,
}

fn harness() -> Harness {
    let invoker = MockInvoker::new();
    let tools = Arc::new(RecordingTools::default());
    let store = Arc::new(InMemoryCheckpointStore::new());
    let service = service_with(
        &test_config(),
        invoker.clone(),
        tools.clone(),
        ScriptedJudge::new(Vec::new()),
        store.clone(),
    );
    Harness {
        invoker,
        tools,
        store,
        service,
    }
}

impl Harness {
    async fn turn(
        &self,
        thread: &str,
        user: &str,
    ) -> (switchboard::TurnReport, Vec<TurnEvent>) {
        let (sink, rx) = EventSink::channel(256);
        let report = self
            .service
            .handle_turn(thread, user, &sink, CancelSignal::never())
            .await
            .expect("turn commits");
        drop(sink);
        (report, common::drain(rx).await)
    }

    async fn saved(&self, thread: &str) -> ConversationState {
        self.store.load(thread).await.unwrap().expect("checkpoint saved")
    }
}

fn tool_results(state: &ConversationState) -> Vec<(String, String, bool)> {
    state
        .messages
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult {
                tool_name,
                content,
                is_error,
                ..
            } => Some((tool_name.clone(), content.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

/// Log with the given accepted transfers, as a stored checkpoint.
fn state_with_transfers(
    thread: &str,
    transfers: &[(&str, &str)],
    current: &str,
) -> ConversationState {
    let mut state = ConversationState::new(thread, "Broker");
    state.messages.push(Message::user("I want to see a flat"));
    for (i, (from, to)) in transfers.iter().enumerate() {
        let id = format!("seed{i}");
        state.messages.push(Message::agent_calls(
            *from,
            None,
            vec![handoff(&id, to, "continue with the client")],
        ));
        state.messages.push(Message::tool_result(
            format!("transfer_to_{to}"),
            id,
            accepted_text(to),
            false,
        ));
    }
    state.current_agent = current.to_string();
    state.version = 1;
    state
}

#[tokio::test]
async fn handoff_dispatches_target_in_same_turn() {
    let h = harness();
    h.invoker.queue(
        "Broker",
        vec![calls(vec![handoff(
            "h1",
            "Concierge",
            "Book a Friday viewing of the Elm Street flat for Ana",
        )])],
    );
    h.invoker
        .queue("Concierge", vec![text("Booked: Friday 10:00 at Elm Street.")]);

    let (report, events) = h.turn("t1", "Can I see the Elm Street flat on Friday?").await;

    assert_eq!(report.reply, "Booked: Friday 10:00 at Elm Street.");
    assert_eq!(report.current_agent, "Concierge");
    assert_eq!(report.status, TurnStatus::Accepted);

    // The receiving agent starts from the task description alone
    let concierge = h.invoker.recorded_for("Concierge");
    assert_eq!(concierge.len(), 1);
    assert_eq!(
        concierge[0].messages,
        vec![Message::user(
            "Book a Friday viewing of the Elm Street flat for Ana"
        )]
    );
    assert!(concierge[0].tools.contains(&"transfer_to_Broker".to_string()));
    assert!(concierge[0].partner_guidelines.contains("transfer_to_Broker"));

    assert!(events.contains(&TurnEvent::Handoff {
        from: "Broker".into(),
        to: "Concierge".into(),
    }));
    assert!(matches!(
        events.last(),
        Some(TurnEvent::LlmMessage { content }) if content == "Booked: Friday 10:00 at Elm Street."
    ));

    let saved = h.saved("t1").await;
    assert_eq!(saved.current_agent, "Concierge");
    assert_eq!(saved.transfer_history.len(), 1);
    assert!(saved.handoff_seed.is_none());
}

#[tokio::test]
async fn immediate_loop_is_blocked_on_the_next_turn() {
    let h = harness();
    h.invoker.queue(
        "Broker",
        vec![calls(vec![handoff("h1", "Concierge", "Book a viewing")])],
    );
    h.invoker.queue(
        "Concierge",
        vec![
            text("Which day suits you?"),
            calls(vec![handoff("h2", "Broker", "Client asks about prices")]),
            text("Prices are on the listing; shall I book Friday?"),
            text("The listing price is 320k. Shall I book Friday?"),
        ],
    );

    h.turn("t1", "I want to see a flat").await;
    let (report, events) = h.turn("t1", "How much is it?").await;

    assert_eq!(report.current_agent, "Concierge");
    assert_eq!(
        report.reply,
        "The listing price is 320k. Shall I book Friday?"
    );
    assert_eq!(h.invoker.recorded_for("Broker").len(), 1);

    let saved = h.saved("t1").await;
    let blocked = tool_results(&saved)
        .into_iter()
        .find(|(name, _, _)| name == "transfer_to_Broker")
        .expect("blocked transfer recorded");
    assert!(blocked.2);
    assert!(blocked.1.contains("Transfer blocked"));
    assert!(blocked.1.contains("Broker"));

    // The blocked transfer surfaces once at validation, then the retry carries guidance
    let feedback: Vec<&String> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ValidationFailed { feedback } => Some(feedback),
            _ => None,
        })
        .collect();
    assert_eq!(feedback.len(), 1);
    assert!(feedback[0].starts_with("TRANSFER LOOP DETECTED"));

    let last = h.invoker.recorded_for("Concierge").pop().unwrap();
    let instruction = last.retry_instruction.expect("retry instruction");
    assert!(instruction.contains("Book the viewing with the details already provided"));
    assert!(instruction.contains("RECENT TOOL ERROR"));

    // The withheld draft never reaches the log
    assert!(
        !saved
            .messages
            .iter()
            .any(|m| m.text() == Some("Prices are on the listing; shall I book Friday?"))
    );
}

#[tokio::test]
async fn ping_pong_is_blocked() {
    let h = harness();
    let seeded = state_with_transfers(
        "t1",
        &[
            ("Broker", "Concierge"),
            ("Concierge", "Broker"),
            ("Broker", "Concierge"),
        ],
        "Concierge",
    );
    h.store.save("t1", &seeded).await.unwrap();
    h.invoker.queue(
        "Concierge",
        vec![
            calls(vec![handoff("h9", "Broker", "Back to you")]),
            text("I'll handle it here."),
            text("Friday at 10:00 is available, shall I confirm?"),
        ],
    );

    let (report, _) = h.turn("t1", "Hello again").await;

    assert_eq!(report.current_agent, "Concierge");
    assert_eq!(report.version, 2);
    let saved = h.saved("t1").await;
    let (_, content, is_error) = tool_results(&saved).pop().unwrap();
    assert!(is_error);
    assert!(content.contains("Ping-pong"));
}

#[tokio::test]
async fn self_transfer_is_rejected_without_alert() {
    let h = harness();
    h.invoker.queue(
        "Broker",
        vec![
            calls(vec![handoff("h1", "Broker", "Handle it")]),
            text("Here are three flats in Porto."),
        ],
    );

    let (report, events) = h.turn("t1", "Flats in Porto?").await;

    assert_eq!(report.reply, "Here are three flats in Porto.");
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, TurnEvent::ValidationFailed { .. }))
    );
    let saved = h.saved("t1").await;
    assert_eq!(
        tool_results(&saved),
        vec![(
            "transfer_to_Broker".to_string(),
            "Error: You are already the correct agent to handle this task. Please respond to the user directly."
                .to_string(),
            true
        )]
    );
    assert!(saved.transfer_history.is_empty());
}

#[tokio::test]
async fn simultaneous_transfers_are_rejected() {
    let h = harness();
    h.invoker.queue(
        "Broker",
        vec![
            calls(vec![
                handoff("h1", "Concierge", "Book a viewing"),
                handoff("h2", "Analyst", "Compute the mortgage"),
            ]),
            text("Let me first check your budget."),
            text("What monthly budget do you have in mind?"),
        ],
    );

    let (report, events) = h.turn("t1", "Book a viewing and run the numbers").await;

    assert_eq!(report.current_agent, "Broker");
    assert_eq!(report.reply, "What monthly budget do you have in mind?");
    assert!(events.iter().any(|e| matches!(
        e,
        TurnEvent::ValidationFailed { feedback } if feedback.contains("simultaneous")
    )));

    let saved = h.saved("t1").await;
    let results = tool_results(&saved);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, content, is_error)| *is_error
        && content.contains("Only ONE transfer per response")));
    assert!(h.invoker.recorded_for("Concierge").is_empty());
}

#[tokio::test]
async fn unknown_and_spectator_targets_are_rejected() {
    let h = harness();
    h.invoker.queue(
        "Broker",
        vec![
            calls(vec![handoff("h1", "Ghost", "Do something")]),
            calls(vec![handoff("h2", "suggestions", "Suggest things")]),
            text("I can help with that directly."),
        ],
    );

    h.turn("t1", "Help").await;

    let saved = h.saved("t1").await;
    let results = tool_results(&saved);
    assert!(results[0].1.contains("no agent named 'Ghost'"));
    assert!(results[1].1.contains("does not accept transfers"));
    assert_eq!(saved.current_agent, "Broker");
}

#[tokio::test]
async fn domain_calls_next_to_a_handoff_still_run_in_order() {
    let h = harness();
    h.invoker.queue(
        "Broker",
        vec![calls(vec![
            tool("c1", "search_properties", json!({"city": "Porto"})),
            handoff("h1", "Analyst", "Mortgage for a 300k flat"),
        ])],
    );
    h.invoker
        .queue("Analyst", vec![text("Roughly 1,250 per month over 30 years.")]);

    let (report, events) = h.turn("t1", "Search Porto and estimate a mortgage").await;

    assert_eq!(report.current_agent, "Analyst");
    assert_eq!(h.tools.names(), vec!["search_properties".to_string()]);

    let saved = h.saved("t1").await;
    let names: Vec<String> = tool_results(&saved).into_iter().map(|r| r.0).collect();
    assert_eq!(names, vec!["search_properties", "transfer_to_Analyst"]);

    let starts: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ToolStart { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec!["c1", "h1"]);
}

#[tokio::test]
async fn malformed_handoff_goes_through_retry() {
    let h = harness();
    h.invoker.queue(
        "Broker",
        vec![
            calls(vec![tool("h1", "transfer_to_Concierge", json!({}))]),
            calls(vec![handoff("h2", "Concierge", "Book a Friday viewing")]),
        ],
    );
    h.invoker
        .queue("Concierge", vec![text("Friday 10:00 is booked.")]);

    let (report, events) = h.turn("t1", "Book Friday").await;

    assert_eq!(report.current_agent, "Concierge");
    assert!(events.iter().any(|e| matches!(
        e,
        TurnEvent::ValidationFailed { feedback } if feedback.contains("malformed")
    )));
    let broker = h.invoker.recorded_for("Broker");
    assert!(
        broker[1]
            .retry_instruction
            .as_deref()
            .is_some_and(|i| i.contains("task_description"))
    );
    // The malformed attempt is not part of the log
    let saved = h.saved("t1").await;
    assert_eq!(tool_results(&saved).len(), 1);
}

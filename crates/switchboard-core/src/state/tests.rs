use super::*;
use crate::message::ToolCall;
use proptest::prelude::*;
use serde_json::json;

fn handoff_turn(state: &mut ConversationState, from: &str, to: &str, accepted: bool) {
    let call_id = format!("call_{}", state.messages.len());
    state.messages.push(Message::agent_calls(
        from,
        None,
        vec![ToolCall::new(
            call_id.clone(),
            format!("transfer_to_{to}"),
            json!({"task_description": "continue"}),
        )],
    ));
    let content = if accepted { "Transferred" } else { "Error: blocked" };
    state.messages.push(Message::tool_result(
        format!("transfer_to_{to}"),
        call_id,
        content,
        !accepted,
    ));
}

#[test]
fn test_new_state_defaults() {
    let state = ConversationState::new("t1", "Broker");
    assert_eq!(state.current_agent, "Broker");
    assert!(state.messages.is_empty());
    assert!(state.retry_context.is_none());
    assert_eq!(state.version, 0);
}

#[test]
fn test_derive_transfer_history_in_log_order() {
    let mut state = ConversationState::new("t1", "Broker");
    state.messages.push(Message::user("hi"));
    handoff_turn(&mut state, "Broker", "Concierge", true);
    handoff_turn(&mut state, "Concierge", "Broker", false);
    handoff_turn(&mut state, "Concierge", "Analyst", true);

    let history = state.derive_transfer_history(DEFAULT_TRANSFER_WINDOW, |_| false);
    assert_eq!(
        history,
        vec![
            TransferRecord::new("Broker", "Concierge", 1),
            TransferRecord::new("Concierge", "Analyst", 5),
        ]
    );
}

#[test]
fn test_derive_transfer_history_with_reused_call_ids() {
    let handoff = |from: &str, to: &str| {
        Message::agent_calls(
            from,
            None,
            vec![ToolCall::new(
                "h0",
                format!("transfer_to_{to}"),
                json!({"task_description": "continue"}),
            )],
        )
    };
    let mut state = ConversationState::new("t1", "Broker");
    state.messages.push(Message::user("hi"));
    state.messages.push(handoff("Broker", "Concierge"));
    state.messages.push(Message::tool_result(
        "transfer_to_Concierge",
        "h0",
        "Transferred",
        false,
    ));
    state.messages.push(Message::user("back to the broker please"));
    state.messages.push(handoff("Concierge", "Broker"));
    state.messages.push(Message::tool_result(
        "transfer_to_Broker",
        "h0",
        "Error: blocked",
        true,
    ));

    let history = state.derive_transfer_history(DEFAULT_TRANSFER_WINDOW, |_| false);
    assert_eq!(history, vec![TransferRecord::new("Broker", "Concierge", 1)]);
}

#[test]
fn test_derive_transfer_history_window_and_exclusion() {
    let mut state = ConversationState::new("t1", "A");
    for i in 0..6 {
        let (from, to) = if i % 2 == 0 { ("A", "B") } else { ("B", "A") };
        handoff_turn(&mut state, from, to, true);
    }
    assert_eq!(state.derive_transfer_history(3, |_| false).len(), 3);
    assert_eq!(state.derive_transfer_history(100, |_| false).len(), 6);
    assert!(state.derive_transfer_history(100, |n| n == "B").is_empty());

    state.refresh_transfer_history(2, |_| false);
    assert_eq!(state.transfer_history.len(), 2);
    assert_eq!(state.transfer_history[1].to_agent, "A");
}

#[test]
fn test_recent_tool_error() {
    let mut state = ConversationState::new("t1", "Broker");
    state.messages.push(Message::tool_result("search", "c1", "timeout", true));
    state.messages.push(Message::tool_result("search", "c2", "ok", false));
    assert_eq!(state.recent_tool_error(5), Some("timeout"));
    assert_eq!(state.recent_tool_error(1), None);
}

#[test]
fn test_trim_keeps_anchor_and_drops_orphans() {
    let mut messages = vec![Message::user("first")];
    messages.push(Message::agent_calls(
        "Broker",
        None,
        vec![ToolCall::new("c1", "search", json!({}))],
    ));
    messages.push(Message::tool_result("search", "c1", "r1", false));
    messages.push(Message::tool_result("search", "c2", "r2", false));
    messages.push(Message::agent_text("Broker", "done"));
    messages.push(Message::user("next"));

    // Dropping two leaves the second tool result orphaned right after the anchor.
    trim_log(&mut messages, 4);
    assert_eq!(messages[0], Message::user("first"));
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1], Message::agent_text("Broker", "done"));
}

#[test]
fn test_trim_noop_when_short() {
    let mut state = ConversationState::new("t1", "Broker");
    state.messages.push(Message::user("a"));
    state.messages.push(Message::agent_text("Broker", "b"));
    state.trim_messages(30);
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.trimmed_messages(30), state.messages);
}

#[test]
fn test_state_roundtrip_tolerates_missing_optional_fields() {
    let state = ConversationState::new("t1", "Broker");
    let mut value = serde_json::to_value(&state).unwrap();
    let obj = value.as_object_mut().unwrap();
    obj.remove("alerts");
    obj.remove("transfer_history");
    obj.remove("version");
    let back: ConversationState = serde_json::from_value(value).unwrap();
    assert_eq!(back.thread_id, "t1");
    assert!(back.alerts.is_empty());
}

fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(|t| Message::user(t)),
        "[a-z]{1,8}".prop_map(|t| Message::agent_text("Broker", t)),
        "[a-z]{1,8}".prop_map(|t| Message::tool_result("search", "c", t, false)),
    ]
}

proptest! {
    #[test]
    fn trim_respects_cap_and_anchor(
        messages in proptest::collection::vec(arb_message(), 1..80),
        cap in 2..40usize,
    ) {
        let first = messages[0].clone();
        let mut trimmed = messages.clone();
        trim_log(&mut trimmed, cap);
        prop_assert!(trimmed.len() <= cap);
        prop_assert_eq!(&trimmed[0], &first);
        if messages.len() > cap && trimmed.len() > 1 {
            prop_assert!(!trimmed[1].is_tool_result());
        }
        if messages.len() <= cap {
            prop_assert_eq!(trimmed, messages);
        }
    }
}

use super::*;

#[test]
fn test_transfer_context_render() {
    let ctx = TransferContext {
        recent_targets: vec!["Concierge".into()],
        chain: vec!["Broker".into(), "Concierge".into()],
        simultaneous: Some(vec!["Broker".into(), "Analyst".into()]),
        ping_pong: None,
    };
    let text = ctx.render();
    assert!(text.contains("Recently transferred to: Concierge"));
    assert!(text.contains("attempted transfers to Broker, Analyst"));
    assert!(text.contains("Transfer chain: Broker → Concierge"));
    assert!(!text.contains("PING-PONG"));
    assert!(!ctx.is_empty());
    assert!(TransferContext::default().is_empty());
    assert!(TransferContext::default().render().is_empty());
}

#[test]
fn test_validation_result_accepts_is_valid_alias() {
    let parsed: ValidationResult =
        serde_json::from_str(r#"{"is_valid": false, "reason": "apologizes"}"#).unwrap();
    assert_eq!(parsed, ValidationResult::invalid("apologizes"));
    let parsed: ValidationResult = serde_json::from_str(r#"{"valid": true}"#).unwrap();
    assert_eq!(parsed, ValidationResult::valid());
}

#[test]
fn test_agent_reply_constructors() {
    assert!(!AgentReply::text("hi").has_tool_calls());
    let reply = AgentReply::calls(vec![ToolCall::new("c", "search", Value::Null)]);
    assert!(reply.has_tool_calls());
    assert!(reply.content.is_none());
}

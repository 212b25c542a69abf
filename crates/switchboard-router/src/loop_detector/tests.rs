use super::*;
use proptest::prelude::*;

fn rec(from: &str, to: &str, idx: usize) -> TransferRecord {
    TransferRecord::new(from, to, idx)
}

#[test]
fn test_immediate_loop_detected() {
    let history = vec![rec("Broker", "Concierge", 1)];
    let verdict = LoopDetector::default().detect("Concierge", "Broker", &history);
    assert!(matches!(verdict, LoopVerdict::Immediate { .. }), "{verdict:?}");
    assert!(verdict.reason().unwrap().contains("Broker"));
}

#[test]
fn test_ping_pong_detected() {
    let history = vec![
        rec("Broker", "Concierge", 1),
        rec("Concierge", "Broker", 3),
        rec("Broker", "Concierge", 5),
    ];
    let verdict = LoopDetector::default().detect("Concierge", "Broker", &history);
    assert!(matches!(verdict, LoopVerdict::PingPong { .. }), "{verdict:?}");
    assert_eq!(
        verdict.reason(),
        Some("Ping-pong pattern detected between Concierge and Broker")
    );
}

#[test]
fn test_clear_cases() {
    let detector = LoopDetector::default();
    let cases: Vec<(&str, &str, Vec<TransferRecord>)> = vec![
        ("Broker", "Concierge", vec![]),
        ("Concierge", "Analyst", vec![rec("Broker", "Concierge", 1)]),
        (
            "Analyst",
            "Broker",
            vec![rec("Broker", "Concierge", 1), rec("Concierge", "Analyst", 3)],
        ),
        // Same direction twice does not alternate.
        (
            "Broker",
            "Concierge",
            vec![rec("Broker", "Concierge", 1), rec("Broker", "Concierge", 3)],
        ),
    ];
    for (current, target, history) in cases {
        let verdict = detector.detect(current, target, &history);
        assert_eq!(
            verdict,
            LoopVerdict::Clear,
            "{current} -> {target} over {history:?}"
        );
        assert!(!verdict.is_loop());
        assert!(verdict.reason().is_none());
    }
}

#[test]
fn test_ping_pong_ignores_third_party_records() {
    let history = vec![
        rec("A", "B", 1),
        rec("B", "C", 3),
        rec("C", "B", 5),
        rec("B", "A", 7),
        rec("A", "D", 9),
        rec("D", "A", 11),
    ];
    // Pair records between A and B: (A->B), (B->A), alternating.
    let verdict = LoopDetector::default().detect("A", "B", &history);
    assert_eq!(verdict.kind(), "ping_pong");
}

#[test]
fn test_threshold_is_configurable() {
    let history = vec![rec("A", "B", 1), rec("B", "A", 3)];
    assert!(LoopDetector::new(2).detect("A", "B", &history).is_loop());
    // With a higher threshold only the immediate check can fire.
    let verdict = LoopDetector::new(3).detect("A", "B", &history);
    assert_eq!(verdict.kind(), "immediate");
    assert_eq!(LoopDetector::new(0).threshold(), 2);
}

#[test]
fn test_transfer_chain() {
    assert!(transfer_chain(&[]).is_empty());
    let history = vec![
        rec("Broker", "Concierge", 1),
        rec("Concierge", "Analyst", 3),
    ];
    assert_eq!(
        transfer_chain(&history),
        vec!["Broker", "Concierge", "Analyst"]
    );
    let gapped = vec![rec("A", "B", 1), rec("C", "D", 3)];
    assert_eq!(transfer_chain(&gapped), vec!["A", "B", "C", "D"]);
}

#[test]
fn test_loop_guidance() {
    let history = vec![rec("Broker", "Concierge", 1)];
    let text = loop_guidance("Concierge", Some("Schedule the viewing yourself"), &history);
    assert_eq!(
        text,
        "Concierge received this conversation from Broker. Schedule the viewing yourself instead of transferring."
    );
    let text = loop_guidance("Analyst", None, &history);
    assert_eq!(
        text,
        "Execute Analyst core function as defined in system prompt instead of transferring."
    );
}

fn agent() -> impl Strategy<Value = String> {
    prop_oneof![Just("A"), Just("B"), Just("C"), Just("D")].prop_map(String::from)
}

fn arb_history() -> impl Strategy<Value = Vec<TransferRecord>> {
    proptest::collection::vec((agent(), agent()), 0..12).prop_map(|pairs| {
        pairs
            .into_iter()
            .filter(|(f, t)| f != t)
            .enumerate()
            .map(|(i, (f, t))| TransferRecord::new(f, t, i * 2))
            .collect()
    })
}

proptest! {
    #[test]
    fn immediate_loop_always_detected(mut history in arb_history(), a in agent(), b in agent()) {
        prop_assume!(a != b);
        history.push(TransferRecord::new(b.clone(), a.clone(), 100));
        prop_assert!(LoopDetector::default().detect(&a, &b, &history).is_loop());
    }

    #[test]
    fn alternating_pair_triggers_ping_pong(
        a in agent(),
        b in agent(),
        threshold in 2..5usize,
        extra in 0..4usize,
    ) {
        prop_assume!(a != b);
        let len = threshold + extra;
        let history: Vec<TransferRecord> = (0..len)
            .map(|i| if i % 2 == 0 {
                TransferRecord::new(a.clone(), b.clone(), i)
            } else {
                TransferRecord::new(b.clone(), a.clone(), i)
            })
            .collect();
        let last = history.last().unwrap();
        let verdict = LoopDetector::new(threshold).detect(&last.to_agent, &last.from_agent, &history);
        prop_assert_eq!(verdict.kind(), "ping_pong");
    }

    #[test]
    fn short_pair_history_is_never_ping_pong(
        history in arb_history(),
        a in agent(),
        b in agent(),
        threshold in 2..5usize,
    ) {
        prop_assume!(a != b);
        let pair = history
            .iter()
            .filter(|r| (r.from_agent == a && r.to_agent == b) || (r.from_agent == b && r.to_agent == a))
            .count();
        prop_assume!(pair < threshold);
        let verdict = LoopDetector::new(threshold).detect(&a, &b, &history);
        prop_assert_ne!(verdict.kind(), "ping_pong");
    }

    #[test]
    fn detection_is_deterministic(history in arb_history(), a in agent(), b in agent()) {
        let detector = LoopDetector::default();
        prop_assert_eq!(detector.detect(&a, &b, &history), detector.detect(&a, &b, &history));
    }
}

use regex::Regex;
use std::sync::LazyLock;

pub const MAX_SUGGESTIONS: usize = 3;

fn list_marker() -> &'static Regex {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s*").expect("Failed to compile list marker regex")
    });
    &RE
}

/// Follow-up questions from a suggestion agent's reply, one per line with
/// bullets or numbering removed.
pub fn parse_suggestions(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| list_marker().replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .take(MAX_SUGGESTIONS)
        .collect()
}

//! Deterministic transfer loop detection.
//!
//! Pure functions over the trailing transfer records. No external calls and
//! O(window) per check.

use switchboard_core::TransferRecord;

pub const DEFAULT_LOOP_THRESHOLD: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopVerdict {
    Clear,
    /// The target just transferred the conversation to the current agent.
    Immediate { reason: String },
    /// The pair has been alternating transfers.
    PingPong { reason: String },
}

impl LoopVerdict {
    pub fn is_loop(&self) -> bool {
        !matches!(self, LoopVerdict::Clear)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            LoopVerdict::Clear => None,
            LoopVerdict::Immediate { reason } | LoopVerdict::PingPong { reason } => Some(reason),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LoopVerdict::Clear => "clear",
            LoopVerdict::Immediate { .. } => "immediate",
            LoopVerdict::PingPong { .. } => "ping_pong",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopDetector {
    threshold: usize,
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(DEFAULT_LOOP_THRESHOLD)
    }
}

impl LoopDetector {
    /// `threshold` below 2 is raised to 2; alternation needs two records.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(2),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Classify a prospective `current -> target` transfer.
    ///
    /// Ping-pong is checked before the immediate loop, so when both
    /// conditions hold the reason names the ping-pong pattern.
    pub fn detect(&self, current: &str, target: &str, history: &[TransferRecord]) -> LoopVerdict {
        if self.is_ping_pong(current, target, history) {
            return LoopVerdict::PingPong {
                reason: format!("Ping-pong pattern detected between {current} and {target}"),
            };
        }
        if let Some(last) = history.last()
            && last.from_agent == target
            && last.to_agent == current
        {
            return LoopVerdict::Immediate {
                reason: format!("Immediate loop: {target} just transferred to {current}"),
            };
        }
        LoopVerdict::Clear
    }

    fn is_ping_pong(&self, current: &str, target: &str, history: &[TransferRecord]) -> bool {
        let between_pair = |r: &&TransferRecord| {
            (r.from_agent == current && r.to_agent == target)
                || (r.from_agent == target && r.to_agent == current)
        };
        let recent: Vec<&TransferRecord> = history
            .iter()
            .rev()
            .filter(between_pair)
            .take(self.threshold)
            .collect();
        if recent.len() < self.threshold {
            return false;
        }
        recent
            .windows(2)
            .all(|w| w[0].from_agent == w[1].to_agent && w[0].to_agent == w[1].from_agent)
    }
}

/// Agents reading left to right along the transfer history, e.g.
/// `[Broker, Concierge, Broker]`.
pub fn transfer_chain(history: &[TransferRecord]) -> Vec<String> {
    let mut chain: Vec<String> = Vec::with_capacity(history.len() + 1);
    for record in history {
        if chain.last() != Some(&record.from_agent) {
            chain.push(record.from_agent.clone());
        }
        chain.push(record.to_agent.clone());
    }
    chain
}

/// Guidance for an agent whose transfer was blocked.
pub fn loop_guidance(
    current: &str,
    primary_function: Option<&str>,
    history: &[TransferRecord],
) -> String {
    let action = primary_function.map_or_else(
        || format!("Execute {current} core function as defined in system prompt"),
        str::to_string,
    );
    match history.last() {
        Some(last) if last.to_agent == current => format!(
            "{current} received this conversation from {}. {action} instead of transferring.",
            last.from_agent
        ),
        _ => format!("{action} instead of transferring."),
    }
}

#[cfg(test)]
mod tests;

use crate::errors::SwitchboardError;
use crate::handoff;
use crate::message::ToolDefinition;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use tracing::{debug, warn};

/// Static description of an agent role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub partners: BTreeSet<String>,
    #[serde(default)]
    pub spectator: bool,
    /// What this agent should do instead of transferring when a loop is blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_function: Option<String>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            instructions: String::new(),
            partners: BTreeSet::new(),
            spectator: false,
            primary_function: None,
        }
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    #[must_use]
    pub fn with_partners<I, S>(mut self, partners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partners = partners.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_primary_function(mut self, primary_function: impl Into<String>) -> Self {
        self.primary_function = Some(primary_function.into());
        self
    }

    #[must_use]
    pub fn as_spectator(mut self) -> Self {
        self.spectator = true;
        self
    }
}

/// Process-wide lookup of agents.
///
/// Populated once at startup and then shared read-only (behind an `Arc`)
/// with every router. There is no removal operation.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentDescriptor>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = AgentDescriptor>,
    ) -> Result<Self, SwitchboardError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Add an agent. Names must be usable as the suffix of a tool name.
    pub fn register(&mut self, descriptor: AgentDescriptor) -> Result<(), SwitchboardError> {
        let name = descriptor.name.clone();
        if !is_valid_agent_name(&name) {
            warn!(
                "agent registry: rejecting agent with invalid name '{}'",
                name.escape_debug()
            );
            return Err(SwitchboardError::Registry(format!(
                "invalid agent name '{name}': use letters, digits, '_' or '-'"
            )));
        }
        if self.agents.contains_key(&name) {
            return Err(SwitchboardError::Registry(format!(
                "agent '{name}' is already registered"
            )));
        }
        debug!(
            "agent registry: registered '{}' (spectator={}, partners={})",
            name,
            descriptor.spectator,
            descriptor.partners.len()
        );
        self.agents.insert(name, descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&AgentDescriptor> {
        self.agents.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Description used in handoff instructions, with a generic fallback for
    /// unknown or undescribed agents.
    pub fn describe(&self, name: &str) -> String {
        match self.agents.get(name) {
            Some(agent) if !agent.description.trim().is_empty() => agent.description.clone(),
            _ => format!("{name} agent for specialized assistance"),
        }
    }

    pub fn is_spectator(&self, name: &str) -> bool {
        self.agents.get(name).is_some_and(|a| a.spectator)
    }

    pub fn partners_of(&self, name: &str) -> BTreeSet<String> {
        self.agents
            .get(name)
            .map(|a| a.partners.clone())
            .unwrap_or_default()
    }

    /// Sorted agent names.
    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Partners an agent can actually hand off to: registered and not spectators.
    fn reachable_partners<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a AgentDescriptor> {
        self.agents
            .get(name)
            .into_iter()
            .flat_map(|a| a.partners.iter())
            .filter_map(|p| self.agents.get(p))
            .filter(|p| !p.spectator)
    }

    /// One `transfer_to_<partner>` tool definition per reachable partner.
    pub fn handoff_tools(&self, name: &str) -> Vec<ToolDefinition> {
        self.reachable_partners(name)
            .map(|p| handoff::definition(&p.name, &self.describe(&p.name)))
            .collect()
    }

    /// Instruction block appended to an agent's own instructions describing
    /// who it may transfer to. Empty for agents without partners.
    pub fn partner_guidelines(&self, name: &str) -> String {
        let partners: Vec<&AgentDescriptor> = self.reachable_partners(name).collect();
        if partners.is_empty() {
            return String::new();
        }
        let mut out = String::from("TRANSFER GUIDELINES:\n");
        for partner in &partners {
            let _ = writeln!(
                out,
                "- {}{}: {}",
                handoff::HANDOFF_PREFIX,
                partner.name,
                self.describe(&partner.name)
            );
        }
        out.push_str(
            "\nTransfer only when the request is outside your own function. \
             Make at most ONE transfer per response and include every detail the \
             receiving agent needs in task_description. \
             Never transfer back to an agent that just transferred to you.",
        );
        out
    }

    /// Cross-check partner references and the root agent.
    pub fn validate(&self, root_agent: &str) -> Result<(), SwitchboardError> {
        match self.agents.get(root_agent) {
            None => {
                return Err(SwitchboardError::Registry(format!(
                    "root agent '{root_agent}' is not registered"
                )));
            }
            Some(agent) if agent.spectator => {
                return Err(SwitchboardError::Registry(format!(
                    "root agent '{root_agent}' is a spectator"
                )));
            }
            Some(_) => {}
        }
        for agent in self.agents.values() {
            for partner in &agent.partners {
                if partner == &agent.name {
                    return Err(SwitchboardError::Registry(format!(
                        "agent '{}' lists itself as a partner",
                        agent.name
                    )));
                }
                if !self.agents.contains_key(partner) {
                    return Err(SwitchboardError::Registry(format!(
                        "agent '{}' lists unknown partner '{partner}'",
                        agent.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn is_valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

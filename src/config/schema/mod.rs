use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use switchboard_core::{AgentDescriptor, AgentRegistry, SwitchboardError};
use switchboard_router::RouterSettings;
use switchboard_router::settings::{
    DEFAULT_MAX_STEPS, DEFAULT_RETRY_ERROR_WINDOW, DEFAULT_ROOT_AGENT,
};
use tracing::warn;

/// Name under which the follow-up question spectator must be registered.
pub const SUGGESTIONS_AGENT: &str = "suggestions";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

fn default_root_agent() -> String {
    DEFAULT_ROOT_AGENT.to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_loop_threshold() -> usize {
    2
}

fn default_transfer_window() -> usize {
    10
}

fn default_max_messages() -> usize {
    30
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

fn default_validator_timeout_secs() -> u64 {
    30
}

fn default_retry_error_window() -> usize {
    DEFAULT_RETRY_ERROR_WINDOW
}

fn default_validation_context_window() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_root_agent", rename = "rootAgent")]
    pub root_agent: String,
    #[serde(default = "default_max_retries", rename = "maxRetries")]
    pub max_retries: u32,
    #[serde(default = "default_loop_threshold", rename = "loopThreshold")]
    pub loop_threshold: usize,
    #[serde(default = "default_transfer_window", rename = "transferWindow")]
    pub transfer_window: usize,
    #[serde(default = "default_max_messages", rename = "maxMessages")]
    pub max_messages: usize,
    /// Agent invocations allowed per user turn.
    #[serde(default = "default_max_steps", rename = "maxSteps")]
    pub max_steps: usize,
    #[serde(
        default = "default_validator_timeout_secs",
        rename = "validatorTimeoutSecs"
    )]
    pub validator_timeout_secs: u64,
    /// Trailing messages scanned for a tool error to quote in retries.
    #[serde(default = "default_retry_error_window", rename = "retryErrorWindow")]
    pub retry_error_window: usize,
    #[serde(
        default = "default_validation_context_window",
        rename = "validationContextWindow"
    )]
    pub validation_context_window: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            root_agent: default_root_agent(),
            max_retries: default_max_retries(),
            loop_threshold: default_loop_threshold(),
            transfer_window: default_transfer_window(),
            max_messages: default_max_messages(),
            max_steps: default_max_steps(),
            validator_timeout_secs: default_validator_timeout_secs(),
            retry_error_window: default_retry_error_window(),
            validation_context_window: default_validation_context_window(),
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

fn default_max_concurrent_turns() -> usize {
    8
}

fn default_checkpoint_cache_size() -> usize {
    128
}

fn default_background_queue_size() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(
        default = "default_max_concurrent_turns",
        rename = "maxConcurrentTurns"
    )]
    pub max_concurrent_turns: usize,
    /// Checkpoints are kept in memory when unset.
    #[serde(default, rename = "checkpointDir")]
    pub checkpoint_dir: Option<String>,
    #[serde(
        default = "default_checkpoint_cache_size",
        rename = "checkpointCacheSize"
    )]
    pub checkpoint_cache_size: usize,
    #[serde(
        default = "default_background_queue_size",
        rename = "backgroundQueueSize"
    )]
    pub background_queue_size: usize,
    #[serde(default)]
    pub suggestions: bool,
    /// Spectator agent used as the response judge. Every reply is accepted
    /// when unset.
    #[serde(default, rename = "validatorAgent")]
    pub validator_agent: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_turns: default_max_concurrent_turns(),
            checkpoint_dir: None,
            checkpoint_cache_size: default_checkpoint_cache_size(),
            background_queue_size: default_background_queue_size(),
            suggestions: false,
            validator_agent: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

fn default_agents() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor::new(
            "Broker",
            "Front desk for property questions; qualifies requests and routes them",
        )
        .with_partners(["Concierge", "Analyst"]),
        AgentDescriptor::new(
            "Concierge",
            "Schedules property viewings and handles visit logistics",
        )
        .with_partners(["Broker"])
        .with_primary_function("Book the viewing with the details already provided"),
        AgentDescriptor::new(
            "Analyst",
            "Runs mortgage, yield and affordability calculations",
        )
        .with_partners(["Broker"])
        .with_primary_function("Run the requested calculation and report the figures"),
    ]
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentDescriptor>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            agents: default_agents(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), SwitchboardError> {
        self.validate_router()?;
        self.validate_runtime()?;
        self.validate_agents()?;
        Ok(())
    }

    fn validate_router(&self) -> Result<(), SwitchboardError> {
        let r = &self.router;

        if r.max_retries == 0 {
            return Err(SwitchboardError::Config(
                "router.maxRetries must be > 0".into(),
            ));
        }
        if r.max_retries > 10 {
            return Err(SwitchboardError::Config(
                "router.maxRetries is unreasonably large (> 10)".into(),
            ));
        }
        if r.loop_threshold < 2 {
            return Err(SwitchboardError::Config(
                "router.loopThreshold must be >= 2".into(),
            ));
        }
        if r.transfer_window < r.loop_threshold {
            return Err(SwitchboardError::Config(
                "router.transferWindow must be >= router.loopThreshold".into(),
            ));
        }
        if r.max_messages < 2 {
            return Err(SwitchboardError::Config(
                "router.maxMessages must be >= 2".into(),
            ));
        }
        if r.max_steps == 0 {
            return Err(SwitchboardError::Config(
                "router.maxSteps must be > 0".into(),
            ));
        }
        if r.validator_timeout_secs == 0 {
            return Err(SwitchboardError::Config(
                "router.validatorTimeoutSecs must be > 0".into(),
            ));
        }
        if r.max_steps > 100 {
            warn!("router.maxSteps is very high (> 100), runaway turns may be expensive");
        }
        Ok(())
    }

    fn validate_runtime(&self) -> Result<(), SwitchboardError> {
        let rt = &self.runtime;

        if rt.max_concurrent_turns == 0 {
            return Err(SwitchboardError::Config(
                "runtime.maxConcurrentTurns must be > 0".into(),
            ));
        }
        if rt.checkpoint_cache_size == 0 {
            return Err(SwitchboardError::Config(
                "runtime.checkpointCacheSize must be > 0".into(),
            ));
        }
        if rt.background_queue_size == 0 {
            return Err(SwitchboardError::Config(
                "runtime.backgroundQueueSize must be > 0".into(),
            ));
        }
        if let Some(dir) = &rt.checkpoint_dir
            && dir.trim().is_empty()
        {
            return Err(SwitchboardError::Config(
                "runtime.checkpointDir must not be empty when set".into(),
            ));
        }
        Ok(())
    }

    fn validate_agents(&self) -> Result<(), SwitchboardError> {
        let registry = self
            .build_registry()
            .map_err(|e| SwitchboardError::Config(format!("agents: {e}")))?;

        if let Some(validator) = &self.runtime.validator_agent
            && !registry.is_spectator(validator)
        {
            return Err(SwitchboardError::Config(format!(
                "runtime.validatorAgent '{validator}' must be a registered spectator agent"
            )));
        }
        if self.runtime.suggestions && !registry.is_spectator(SUGGESTIONS_AGENT) {
            return Err(SwitchboardError::Config(format!(
                "runtime.suggestions requires a spectator agent named '{SUGGESTIONS_AGENT}'"
            )));
        }
        Ok(())
    }

    /// Registry of the configured agents, cross-checked against the root agent.
    pub fn build_registry(&self) -> Result<AgentRegistry, SwitchboardError> {
        let registry = AgentRegistry::from_descriptors(self.agents.iter().cloned())?;
        registry.validate(&self.router.root_agent)?;
        Ok(registry)
    }

    pub fn router_settings(&self) -> RouterSettings {
        let r = &self.router;
        RouterSettings {
            root_agent: r.root_agent.clone(),
            max_retries: r.max_retries,
            loop_threshold: r.loop_threshold,
            transfer_window: r.transfer_window,
            max_messages: r.max_messages,
            max_steps: r.max_steps,
            validator_timeout: Duration::from_secs(r.validator_timeout_secs),
            retry_error_window: r.retry_error_window,
            validation_context_window: r.validation_context_window,
            suggestions_agent: self
                .runtime
                .suggestions
                .then(|| SUGGESTIONS_AGENT.to_string()),
        }
    }

    pub fn checkpoint_path(&self) -> Option<PathBuf> {
        self.runtime
            .checkpoint_dir
            .as_deref()
            .map(crate::utils::expand_home)
    }
}

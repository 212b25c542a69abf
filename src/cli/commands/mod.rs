mod subcommands;


use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fmt::Write;
use std::path::PathBuf;
use switchboard_core::{AgentRegistry, TransferRecord};
use switchboard_router::loop_detector::{LoopDetector, loop_guidance, transfer_chain};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Multi-agent conversation router", version = crate::VERSION)]
pub struct Cli {
    /// Config file (defaults to ~/.switchboard/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered agents with their partners
    Agents,
    /// Load and validate the configuration
    ValidateConfig,
    /// Run the loop detector against a hand-written transfer history
    CheckLoop {
        /// Agent attempting the transfer
        #[arg(long)]
        current: String,
        /// Transfer target
        #[arg(long)]
        target: String,
        /// Prior transfers, oldest first: `A:B,B:A`
        #[arg(long, default_value = "")]
        history: String,
        /// Override router.loopThreshold
        #[arg(long)]
        threshold: Option<usize>,
    },
    /// Replay a scripted conversation and print events as JSON lines
    Replay {
        script: PathBuf,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Agents => subcommands::agents(config_path)?,
        Commands::ValidateConfig => subcommands::validate_config(config_path)?,
        Commands::CheckLoop {
            current,
            target,
            history,
            threshold,
        } => subcommands::check_loop(config_path, &current, &target, &history, threshold)?,
        Commands::Replay { script } => subcommands::replay(config_path, &script).await?,
    }
    Ok(())
}

/// Parse `A:B,B:A` into transfer records in the given order.
fn parse_history(raw: &str) -> Result<Vec<TransferRecord>> {
    let mut records = Vec::new();
    for (index, pair) in raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
    {
        let (from, to) = pair
            .split_once(':')
            .with_context(|| format!("history entry '{pair}' is not FROM:TO"))?;
        let (from, to) = (from.trim(), to.trim());
        if from.is_empty() || to.is_empty() {
            bail!("history entry '{pair}' has an empty agent name");
        }
        records.push(TransferRecord::new(from, to, index));
    }
    Ok(records)
}

fn render_agents(registry: &AgentRegistry, root: &str) -> String {
    let mut out = String::new();
    for agent in registry.iter() {
        let mut flags = Vec::new();
        if agent.name == root {
            flags.push("root");
        }
        if agent.spectator {
            flags.push("spectator");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        let _ = writeln!(
            out,
            "{}{} - {}",
            agent.name,
            flags,
            registry.describe(&agent.name)
        );
        if !agent.partners.is_empty() {
            let partners: Vec<&str> = agent.partners.iter().map(String::as_str).collect();
            let _ = writeln!(out, "    partners: {}", partners.join(", "));
        }
    }
    out
}

fn render_loop_check(
    detector: LoopDetector,
    registry: Option<&AgentRegistry>,
    current: &str,
    target: &str,
    history: &[TransferRecord],
) -> String {
    let verdict = detector.detect(current, target, history);
    let mut out = format!("verdict: {}\n", verdict.kind());
    if let Some(reason) = verdict.reason() {
        let _ = writeln!(out, "reason: {reason}");
        let primary = registry
            .and_then(|r| r.get(current))
            .and_then(|a| a.primary_function.as_deref());
        let _ = writeln!(out, "guidance: {}", loop_guidance(current, primary, history));
    }
    let chain = transfer_chain(history);
    if chain.len() > 1 {
        let _ = writeln!(out, "chain: {}", chain.join(" → "));
    }
    out
}

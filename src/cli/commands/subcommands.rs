use super::{parse_history, render_agents, render_loop_check};
use crate::config::load_config;
use crate::scripted::{Script, replay as run_replay};
use anyhow::Result;
use std::path::Path;
use switchboard_router::LoopDetector;
use switchboard_router::loop_detector::DEFAULT_LOOP_THRESHOLD;
use tracing::warn;

pub(super) fn agents(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = config.build_registry()?;
    print!("{}", render_agents(&registry, &config.router.root_agent));
    Ok(())
}

pub(super) fn validate_config(config_path: Option<&Path>) -> Result<()> {
    match load_config(config_path) {
        Ok(config) => {
            println!(
                "OK: {} agents, root agent {}",
                config.agents.len(),
                config.router.root_agent
            );
            Ok(())
        }
        Err(e) => {
            println!("ERROR: {e:#}");
            Err(e)
        }
    }
}

pub(super) fn check_loop(
    config_path: Option<&Path>,
    current: &str,
    target: &str,
    history: &str,
    threshold: Option<usize>,
) -> Result<()> {
    let history = parse_history(history)?;
    // The detector is usable without a valid config
    let config = match load_config(config_path) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("config unavailable, using defaults: {:#}", e);
            None
        }
    };
    let registry = config.as_ref().and_then(|c| c.build_registry().ok());
    let threshold = threshold
        .or_else(|| config.as_ref().map(|c| c.router.loop_threshold))
        .unwrap_or(DEFAULT_LOOP_THRESHOLD);
    let detector = LoopDetector::new(threshold);
    print!(
        "{}",
        render_loop_check(detector, registry.as_ref(), current, target, &history)
    );
    Ok(())
}

pub(super) async fn replay(config_path: Option<&Path>, script: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let script = Script::load(script)?;
    let summary = run_replay(&config, script, |record| println!("{record}")).await?;
    println!("{}", serde_json::json!({ "summary": summary }));
    if !summary.unused_replies.is_empty() {
        warn!("scripted replies never used: {:?}", summary.unused_replies);
    }
    Ok(())
}

use crate::config::Config;
use crate::utils::{ensure_dir, get_switchboard_home};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_switchboard_home()?.join("config.json"))
}

pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.json"));
    let path = config_path.unwrap_or(default_path.as_path());

    let mut config = if path.exists() {
        // Shared lock: concurrent readers are fine, writers hold the .lock file
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open config at {}", path.display()))?;
        fs2::FileExt::lock_shared(&file)
            .with_context(|| "Failed to acquire shared lock on config file")?;

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let data: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON from {}", path.display()))?;
        let data = migrate_config(data);

        serde_json::from_value(data).with_context(|| "Failed to deserialize config")?
    } else {
        debug!("no config at {}, using defaults", path.display());
        Config::default()
    };

    apply_env_overrides(&mut config);

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;
    Ok(config)
}

/// Environment wins over the file for deployment-specific runtime knobs.
pub(crate) fn apply_env_overrides(config: &mut Config) {
    if let Ok(dir) = std::env::var("SWITCHBOARD_CHECKPOINT_DIR")
        && !dir.trim().is_empty()
    {
        config.runtime.checkpoint_dir = Some(dir);
    }
    if let Ok(raw) = std::env::var("SWITCHBOARD_MAX_CONCURRENT_TURNS") {
        match raw.trim().parse::<usize>() {
            Ok(n) => config.runtime.max_concurrent_turns = n,
            Err(_) => warn!("ignoring SWITCHBOARD_MAX_CONCURRENT_TURNS={raw:?}: not a number"),
        }
    }
}

/// `router.maxRecursion` was renamed to `router.maxSteps`.
fn migrate_config(data: Value) -> Value {
    if let Value::Object(mut map) = data {
        if let Some(Value::Object(router)) = map.get_mut("router")
            && let Some(steps) = router.remove("maxRecursion")
            && !router.contains_key("maxSteps")
        {
            router.insert("maxSteps".to_string(), steps);
        }
        Value::Object(map)
    } else {
        data
    }
}

pub fn save_config(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.json"));
    let path = config_path.unwrap_or(default_path.as_path());

    ensure_dir(path.parent().context("Config path has no parent")?)?;

    // atomic_write renames over the config, so the lock lives on a sibling file
    let lock_path = path.with_extension("json.lock");
    let lock_file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to create lock file at {}", lock_path.display()))?;
    fs2::FileExt::lock_exclusive(&lock_file)
        .with_context(|| "Failed to acquire exclusive lock on config lock file")?;

    let content = serde_json::to_string_pretty(config)?;
    crate::utils::atomic_write(path, &content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    Ok(())
}

use std::path::{Path, PathBuf};

use super::types::AppConfig;
use crate::process::ProcessKind;

/// Get the default agentflow data directory: ~/.agentflow
pub fn get_agentflow_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".agentflow"))
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)?;
    let mut cfg = toml::from_str::<AppConfig>(&s)?;
    apply_env_overrides(&mut cfg)?;
    Ok(cfg)
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.agentflow/config.toml
    let user_config = get_agentflow_data_dir()?.join("config.toml");

    // Priority 2: ./agentflow.toml (current directory)
    let local_config = Path::new("agentflow.toml");

    let mut cfg: AppConfig = if user_config.exists() {
        let s = std::fs::read_to_string(&user_config)?;
        toml::from_str::<AppConfig>(&s)?
    } else if local_config.exists() {
        let s = std::fs::read_to_string(local_config)?;
        toml::from_str::<AppConfig>(&s)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg)?;
    Ok(cfg)
}

/// Environment variable overrides (highest priority).
fn apply_env_overrides(cfg: &mut AppConfig) -> anyhow::Result<()> {
    if let Some(v) = non_empty_env("AGENTFLOW_PROCESS") {
        cfg.engine.process = v.parse::<ProcessKind>()?;
    }
    if let Some(v) = non_empty_env("AGENTFLOW_MAX_ITER") {
        cfg.engine.max_iter = v
            .parse()
            .map_err(|e| anyhow::anyhow!("AGENTFLOW_MAX_ITER: {e}"))?;
    }
    if let Some(v) = non_empty_env("AGENTFLOW_MAX_RETRIES") {
        cfg.engine.max_retries = v
            .parse()
            .map_err(|e| anyhow::anyhow!("AGENTFLOW_MAX_RETRIES: {e}"))?;
    }
    if let Some(v) = non_empty_env("AGENTFLOW_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    Ok(())
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Centralized path management for mathreel

/// Get the mathreel config directory
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to determine user config directory")?
        .join("mathreel");

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory at {}", config_dir.display()))?;

    Ok(config_dir)
}

/// Get the mathreel data directory
pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("mathreel");

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory at {}", data_dir.display()))?;

    Ok(data_dir)
}

/// Default root for per-job render directories
pub fn default_renders_dir() -> Result<PathBuf> {
    let renders_dir = data_dir()?.join("renders");
    std::fs::create_dir_all(&renders_dir)
        .with_context(|| format!("creating renders directory at {}", renders_dir.display()))?;
    Ok(renders_dir)
}

pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

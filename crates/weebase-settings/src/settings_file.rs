//! Settings file utilities

use anyhow::{Context, Result};
use std::path::PathBuf;

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .context("Could not determine config directory")
        .map(|p| p.join("weebase"))
}

pub fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .context("Could not determine data directory")
        .map(|p| p.join("weebase"))
}

pub fn settings_file() -> Result<PathBuf> {
    config_dir().map(|p| p.join("settings.toml"))
}

pub fn profiles_file() -> Result<PathBuf> {
    data_dir().map(|p| p.join("profiles.json"))
}

/// Default log directory, falling back to the working directory
pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("weebase")
        .join("logs")
}

pub fn ensure_directories() -> Result<()> {
    let dirs = [config_dir()?, data_dir()?];
    for dir in dirs {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {:?}", dir))?;
        }
    }
    Ok(())
}

//! Config command handlers.

use std::path::Path;

use anyhow::{Context, Result};
use wxarchive_core::config;

pub fn path() {
    println!("{}", config::paths::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

pub fn generate() -> Result<()> {
    let toml = config::Config::generate()?;
    print!("{toml}");
    Ok(())
}

pub fn set_base_path(base_path: &Path) -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::save_base_path(base_path)
        .with_context(|| format!("update config at {}", config_path.display()))?;
    println!("base_path set to {}", base_path.display());
    Ok(())
}

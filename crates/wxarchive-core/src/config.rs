//! Configuration management for wxarchive.
//!
//! Loads configuration from ${WXARCHIVE_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
/// To update, edit default_config.toml directly or run `cargo xtask`.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Merges user config values into the default template.
///
/// This ensures new comments/sections from the template are always present,
/// while preserving user's customized values.
fn merge_with_template(user_config: &str) -> Result<String> {
    use toml_edit::DocumentMut;

    let mut doc: DocumentMut = default_config_template()
        .parse()
        .context("Failed to parse default config template")?;

    let user_doc: DocumentMut = user_config.parse().context("Failed to parse user config")?;

    merge_items(doc.as_table_mut(), user_doc.as_table());

    Ok(doc.to_string())
}

/// Recursively merges items from source table into target table.
fn merge_items(target: &mut toml_edit::Table, source: &toml_edit::Table) {
    use toml_edit::Item;

    for (key, value) in source {
        match value {
            Item::Value(v) => {
                target[key] = Item::Value(v.clone());
            }
            Item::Table(src_table) => {
                if let Some(Item::Table(target_table)) = target.get_mut(key) {
                    merge_items(target_table, src_table);
                } else {
                    target[key] = Item::Table(src_table.clone());
                }
            }
            Item::ArrayOfTables(src_arr) => {
                target[key] = Item::ArrayOfTables(src_arr.clone());
            }
            Item::None => {}
        }
    }
}

pub mod paths {
    //! Path resolution for wxarchive configuration and data directories.
    //!
    //! WXARCHIVE_HOME resolution order:
    //! 1. WXARCHIVE_HOME environment variable (if set)
    //! 2. ~/.config/wxarchive (default)

    use std::path::PathBuf;

    /// Returns the wxarchive home directory.
    pub fn wxarchive_home() -> PathBuf {
        if let Ok(home) = std::env::var("WXARCHIVE_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map_or_else(|| PathBuf::from(".wxarchive"), |h| h.join(".config").join("wxarchive"))
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        wxarchive_home().join("config.toml")
    }

    /// Returns the default archive root used when `base_path` is unset.
    pub fn default_base_path() -> PathBuf {
        wxarchive_home().join("photos")
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level filter, e.g. "info" or "wxarchive_core=debug,info"
    pub level: String,
    /// Log file path; relative paths resolve under WXARCHIVE_HOME, empty disables
    pub file: String,
    /// Mirror log output to stderr
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: "wxarchive.log".to_string(),
            console: true,
        }
    }
}

impl LogConfig {
    /// Returns the resolved log file path, or None when file logging is disabled.
    pub fn file_path(&self) -> Option<PathBuf> {
        let trimmed = self.file.trim();
        if trimmed.is_empty() {
            return None;
        }
        let path = PathBuf::from(trimmed);
        if path.is_absolute() {
            Some(path)
        } else {
            Some(paths::wxarchive_home().join(path))
        }
    }
}

/// Automation gateway connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub poll_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9999".to_string(),
            poll_timeout_secs: 30,
            request_timeout_secs: 60,
        }
    }
}

impl GatewayConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Request timeout; long polls get the poll timeout added on top.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Client startup and liveness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub login_poll_interval_ms: u64,
    /// 0 waits forever
    pub login_timeout_secs: u64,
    pub receive_check_interval_secs: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 5,
            login_poll_interval_ms: 1000,
            login_timeout_secs: 0,
            receive_check_interval_secs: 1,
        }
    }
}

impl StartupConfig {
    /// Number of startup attempts, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn login_poll_interval(&self) -> Duration {
        Duration::from_millis(self.login_poll_interval_ms.max(1))
    }

    pub fn login_timeout(&self) -> Option<Duration> {
        if self.login_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.login_timeout_secs))
        }
    }

    pub fn receive_check_interval(&self) -> Duration {
        Duration::from_secs(self.receive_check_interval_secs.max(1))
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for archived images
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_path: Option<PathBuf>,

    /// Skip images sent from the logged-in account
    pub skip_self_messages: bool,

    /// Keep non-ASCII letters and digits (e.g. CJK names) in folder names
    pub unicode_folder_names: bool,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub startup: StartupConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_path: None,
            skip_self_messages: true,
            unicode_folder_names: false,
            log: LogConfig::default(),
            gateway: GatewayConfig::default(),
            startup: StartupConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Returns the archive root, falling back to ${WXARCHIVE_HOME}/photos.
    pub fn effective_base_path(&self) -> PathBuf {
        match &self.base_path {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => paths::default_base_path(),
        }
    }

    /// Saves only the base_path field to the config file.
    ///
    /// # Errors
    /// Returns an error if the config cannot be read, merged, or written.
    pub fn save_base_path(base_path: &Path) -> Result<()> {
        Self::save_base_path_to(&paths::config_path(), base_path)
    }

    /// Saves only the base_path field to a specific config file path.
    ///
    /// Creates the file with default template if it doesn't exist.
    /// If file exists, merges user values into the latest template.
    ///
    /// # Errors
    /// Returns an error if the config cannot be read, merged, or written.
    pub fn save_base_path_to(path: &Path, base_path: &Path) -> Result<()> {
        use toml_edit::{DocumentMut, value};

        let contents = if path.exists() {
            let user_config = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            merge_with_template(&user_config)?
        } else {
            default_config_template().to_string()
        };

        let mut doc: DocumentMut = contents
            .parse()
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        doc["base_path"] = value(base_path.to_string_lossy().into_owned());

        Self::write_config(path, &doc.to_string())
    }

    /// Writes the default config template to `path`.
    ///
    /// # Errors
    /// Fails if the file already exists (no silent overwrite) or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }
        Self::write_config(path, default_config_template())
    }

    /// Renders `Config::default()` into the commented template.
    ///
    /// # Errors
    /// Returns an error if serialization or template parsing fails.
    pub fn generate() -> Result<String> {
        use toml_edit::DocumentMut;

        let generated_toml = toml::to_string(&Config::default())
            .context("Failed to serialize default config to TOML")?;

        let mut doc: DocumentMut = default_config_template()
            .parse()
            .context("Failed to parse default config template")?;
        let generated_doc: DocumentMut = generated_toml
            .parse()
            .context("Failed to parse generated config")?;

        merge_items(doc.as_table_mut(), generated_doc.as_table());

        Ok(doc.to_string())
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

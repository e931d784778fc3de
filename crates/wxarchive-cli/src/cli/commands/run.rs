//! Archiver run command.

use anyhow::{Context, Result};
use tracing::info;
use wxarchive_core::archive::ensure_dir;
use wxarchive_core::config::Config;
use wxarchive_core::logging;

use crate::cli::RunArgs;

/// Applies command-line overrides on top of the loaded config.
fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if let Some(base_path) = &args.base_path {
        config.base_path = Some(base_path.clone());
    }
    if args.include_self {
        config.skip_self_messages = false;
    }
}

pub async fn run(mut config: Config, args: &RunArgs) -> Result<()> {
    apply_overrides(&mut config, args);

    let log = logging::init(&config.log)?;
    if let Some(file) = log.file() {
        info!("Logging to {}", file.display());
    }

    let base_path = config.effective_base_path();
    ensure_dir(&base_path)
        .with_context(|| format!("prepare archive directory {}", base_path.display()))?;

    let result = wxarchive_bot::run(config).await;
    drop(log);
    result
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_overrides_replace_config_values() {
        let mut config = Config {
            base_path: Some(PathBuf::from("/configured")),
            ..Config::default()
        };
        let args = RunArgs {
            base_path: Some(PathBuf::from("/flag")),
            include_self: true,
        };

        apply_overrides(&mut config, &args);

        assert_eq!(config.base_path, Some(PathBuf::from("/flag")));
        assert!(!config.skip_self_messages);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let mut config = Config {
            base_path: Some(PathBuf::from("/configured")),
            skip_self_messages: false,
            ..Config::default()
        };

        apply_overrides(&mut config, &RunArgs::default());

        assert_eq!(config.base_path, Some(PathBuf::from("/configured")));
        assert!(!config.skip_self_messages);
    }

    #[test]
    fn test_include_self_absent_keeps_filter() {
        let mut config = Config::default();

        apply_overrides(&mut config, &RunArgs::default());

        assert!(config.skip_self_messages);
        assert_eq!(config.base_path, None);
    }
}

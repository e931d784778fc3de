//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use wxarchive_core::config;

mod commands;

#[derive(Parser)]
#[command(name = "wxarchive")]
#[command(version)]
#[command(about = "Archive images received in WeChat into per-sender, per-day folders")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run_args: RunArgs,
}

/// Overrides applied on top of the config file when archiving.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Root directory for archived images (overrides base_path from config)
    #[arg(long, value_name = "DIR")]
    base_path: Option<PathBuf>,

    /// Also archive images sent from the logged-in account
    #[arg(long)]
    include_self: bool,
}

impl RunArgs {
    /// Combines subcommand flags with top-level ones; subcommand values win.
    fn or(self, fallback: RunArgs) -> RunArgs {
        RunArgs {
            base_path: self.base_path.or(fallback.base_path),
            include_self: self.include_self || fallback.include_self,
        }
    }
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Listen for images and archive them (default)
    Run {
        #[command(flatten)]
        args: RunArgs,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Generate a fresh config from Rust defaults (for xtask)
    Generate,
    /// Set base_path in the config file, keeping other settings
    SetBasePath {
        /// Root directory for archived images
        #[arg(value_name = "DIR")]
        path: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config { command }) => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Generate => commands::config::generate(),
            ConfigCommands::SetBasePath { path } => commands::config::set_base_path(&path),
        },
        Some(Commands::Run { args }) => start(&args.or(cli.run_args)),
        None => start(&cli.run_args),
    }
}

fn start(args: &RunArgs) -> Result<()> {
    let config = config::Config::load().context("load config")?;

    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(commands::run::run(config, args))
}

use anyhow::Result;
use tracing::{error, info};
use wxarchive_core::config::{Config, paths};

pub mod gateway;
pub mod handlers;
pub mod session;

use crate::gateway::GatewayClient;

/// Runs the archiver against the configured gateway until Ctrl+C.
///
/// # Errors
/// Returns an error if the gateway URL is invalid or the client never
/// becomes ready.
pub async fn run(config: Config) -> Result<()> {
    let client = GatewayClient::new(&config.gateway)?;

    let config_path = paths::config_path();
    if config_path.exists() {
        info!("Config file: {}", config_path.display());
    }
    info!(
        "Gateway: {} | Archive: {} | Skip self: {}",
        client.base_url(),
        config.effective_base_path().display(),
        config.skip_self_messages,
    );

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    session::run(&client, &config, shutdown).await
}

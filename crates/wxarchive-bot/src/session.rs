//! Client lifecycle: connect, listen until told to stop, always clean up.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use wxarchive_core::archive::{ArchiveSettings, Archiver};
use wxarchive_core::client::WechatClient;
use wxarchive_core::config::{Config, StartupConfig};

use crate::handlers::handle_message;

const REMEDIATION: &str = "\
Make sure that:
  1. WeChat desktop is running and logged in
  2. The automation gateway is running and reachable (gateway.base_url)
  3. The WeChat version is supported by the gateway
  4. The gateway has the permissions it needs (try running it as administrator)";

/// Runs the whole service until `shutdown` resolves or the client stops.
///
/// Cleanup runs on every exit path, including a failed connect.
///
/// # Errors
/// Returns an error if the client cannot be started.
pub async fn run<C, F>(client: &C, config: &Config, shutdown: F) -> Result<()>
where
    C: WechatClient,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let result = run_until(client, config, shutdown.as_mut()).await;

    info!("Cleaning up...");
    client.cleanup().await;
    info!("Cleanup completed");
    result
}

async fn run_until<C, F>(client: &C, config: &Config, mut shutdown: Pin<&mut F>) -> Result<()>
where
    C: WechatClient,
    F: Future<Output = ()>,
{
    info!("Initializing WeChat client...");
    tokio::select! {
        () = &mut shutdown => {
            info!("Shutting down...");
            return Ok(());
        }
        connected = connect(client, &config.startup) => connected?,
    }

    let archiver = Archiver::new(client, ArchiveSettings::from_config(config));
    info!(
        "Archiving images to {}",
        archiver.settings().base_path.display()
    );
    listen(
        client,
        &archiver,
        config.startup.receive_check_interval(),
        shutdown,
    )
    .await
}

/// Waits for login and enables receiving, retrying up to `max_attempts`.
///
/// # Errors
/// Returns the last attempt's error once every attempt has failed.
pub async fn connect<C: WechatClient>(client: &C, startup: &StartupConfig) -> Result<()> {
    let attempts = startup.attempts();
    let mut last_error = None;

    for attempt in 1..=attempts {
        match start(client, startup).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!("Startup attempt {attempt}/{attempts} failed: {err:#}");
                last_error = Some(err);
            }
        }
        if attempt < attempts {
            info!("Retrying in {}s...", startup.retry_delay().as_secs());
            tokio::time::sleep(startup.retry_delay()).await;
        }
    }

    error!("WeChat client could not be started after {attempts} attempt(s).\n{REMEDIATION}");
    let err = last_error.unwrap_or_else(|| anyhow!("no startup attempt was made"));
    Err(err.context(format!(
        "WeChat client failed to start after {attempts} attempt(s)"
    )))
}

async fn start<C: WechatClient>(client: &C, startup: &StartupConfig) -> Result<()> {
    wait_for_login(client, startup).await?;
    info!("Enabling message receiving...");
    client
        .enable_receiving()
        .await
        .context("Failed to enable message receiving")?;
    Ok(())
}

async fn wait_for_login<C: WechatClient>(client: &C, startup: &StartupConfig) -> Result<()> {
    info!("Waiting for WeChat login...");
    let poll = async {
        loop {
            if client.is_login().await.context("Login check failed")? {
                return Ok::<(), anyhow::Error>(());
            }
            tokio::time::sleep(startup.login_poll_interval()).await;
        }
    };

    match startup.login_timeout() {
        Some(limit) => tokio::time::timeout(limit, poll).await.with_context(|| {
            format!("Timed out after {}s waiting for WeChat login", limit.as_secs())
        })??,
        None => poll.await?,
    }

    info!("WeChat logged in successfully!");
    Ok(())
}

/// Delivers messages to the archiver until shutdown, until the client stops
/// receiving, or until the callback channel closes.
///
/// # Errors
/// Returns an error if the callback cannot be registered.
pub async fn listen<C, F>(
    client: &C,
    archiver: &Archiver<'_, C>,
    check_interval: Duration,
    mut shutdown: Pin<&mut F>,
) -> Result<()>
where
    C: WechatClient,
    F: Future<Output = ()>,
{
    let (sink, mut messages) = mpsc::unbounded_channel();
    info!("Registering message callback...");
    client
        .register_callback(sink)
        .await
        .context("Failed to register message callback")?;
    info!("Started listening for messages...");

    let mut receive_check = tokio::time::interval(check_interval);
    receive_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    receive_check.tick().await;

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
            message = messages.recv() => match message {
                Some(message) => handle_message(archiver, &message).await,
                None => {
                    warn!("Message callback closed");
                    break;
                }
            },
            _ = receive_check.tick() => {
                if !client.is_receiving().await {
                    warn!("WeChat client stopped receiving messages");
                    // Already delivered messages are still archived.
                    while let Ok(message) = messages.try_recv() {
                        handle_message(archiver, &message).await;
                    }
                    break;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tempfile::tempdir;
    use wxarchive_core::archive::{date_folder, local_time};
    use wxarchive_core::client::MessageSink;
    use wxarchive_core::message::{ImagePayload, InboundMessage, MessageKind, Origin};

    use super::*;

    #[derive(Default)]
    struct FakeClient {
        /// `is_login` answers false this many times first
        logged_out_polls: AtomicUsize,
        never_login: bool,
        enable_failures: AtomicUsize,
        stopped: AtomicBool,
        hold_sink: bool,
        queued: Mutex<Vec<InboundMessage>>,
        sink: Mutex<Option<MessageSink>>,
        names: HashMap<String, String>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl FakeClient {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn count(&self, call: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| **c == call)
                .count()
        }
    }

    impl WechatClient for FakeClient {
        async fn is_login(&self) -> Result<bool> {
            self.record("is_login");
            if self.never_login {
                return Ok(false);
            }
            let remaining = self.logged_out_polls.load(Ordering::SeqCst);
            if remaining > 0 {
                self.logged_out_polls.store(remaining - 1, Ordering::SeqCst);
                return Ok(false);
            }
            Ok(true)
        }

        async fn enable_receiving(&self) -> Result<()> {
            self.record("enable_receiving");
            let remaining = self.enable_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.enable_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(anyhow!("hook not ready"));
            }
            Ok(())
        }

        async fn disable_receiving(&self) -> Result<()> {
            self.record("disable_receiving");
            Ok(())
        }

        async fn is_receiving(&self) -> bool {
            !self.stopped.load(Ordering::SeqCst)
        }

        async fn register_callback(&self, sink: MessageSink) -> Result<()> {
            self.record("register_callback");
            for message in self.queued.lock().unwrap().drain(..) {
                sink.send(message).unwrap();
            }
            if self.hold_sink {
                *self.sink.lock().unwrap() = Some(sink);
            }
            Ok(())
        }

        async fn lookup_display_name(&self, id: &str) -> Option<String> {
            self.names.get(id).cloned()
        }

        async fn save_image(&self, _message: &InboundMessage, destination: &Path) -> bool {
            std::fs::write(destination, b"jpeg").is_ok()
        }

        async fn cleanup(&self) {
            self.record("cleanup");
        }
    }

    fn fast_startup(max_attempts: u32) -> StartupConfig {
        StartupConfig {
            max_attempts,
            retry_delay_secs: 1,
            login_poll_interval_ms: 100,
            login_timeout_secs: 0,
            receive_check_interval_secs: 1,
        }
    }

    fn config_with_base(base: &Path) -> Config {
        Config {
            base_path: Some(base.to_path_buf()),
            startup: fast_startup(2),
            ..Config::default()
        }
    }

    fn message(id: u64, kind: MessageKind, sender: &str) -> InboundMessage {
        InboundMessage {
            id,
            kind,
            sender: sender.to_string(),
            origin: Origin::Direct,
            is_self: false,
            timestamp: 1_709_620_200,
            payload: ImagePayload::default(),
        }
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return found;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(files_under(&path));
            } else {
                found.push(path);
            }
        }
        found
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_waits_for_login() {
        let client = FakeClient {
            logged_out_polls: AtomicUsize::new(3),
            ..FakeClient::default()
        };

        connect(&client, &fast_startup(1)).await.unwrap();

        assert_eq!(client.count("is_login"), 4);
        assert_eq!(client.count("enable_receiving"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_failed_attempt() {
        let client = FakeClient {
            enable_failures: AtomicUsize::new(1),
            ..FakeClient::default()
        };

        connect(&client, &fast_startup(3)).await.unwrap();

        assert_eq!(client.count("enable_receiving"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_max_attempts() {
        let client = FakeClient {
            enable_failures: AtomicUsize::new(10),
            ..FakeClient::default()
        };

        let err = connect(&client, &fast_startup(2)).await.unwrap_err();

        assert!(format!("{err:#}").contains("after 2 attempt(s)"));
        assert!(format!("{err:#}").contains("hook not ready"));
        assert_eq!(client.count("enable_receiving"), 2);
        assert_eq!(client.count("cleanup"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_timeout_fails_attempt() {
        let client = FakeClient {
            never_login: true,
            ..FakeClient::default()
        };
        let startup = StartupConfig {
            login_timeout_secs: 5,
            ..fast_startup(1)
        };

        let err = connect(&client, &startup).await.unwrap_err();

        assert!(format!("{err:#}").contains("waiting for WeChat login"));
        assert_eq!(client.count("enable_receiving"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_archives_until_callback_closes() {
        let dir = tempdir().unwrap();
        let client = FakeClient {
            names: HashMap::from([("wxid_alice".to_string(), "Alice".to_string())]),
            queued: Mutex::new(vec![
                message(1, MessageKind::Text, "wxid_alice"),
                message(2, MessageKind::Image, "wxid_alice"),
                message(3, MessageKind::Image, "wxid_ghost"),
            ]),
            ..FakeClient::default()
        };

        run(&client, &config_with_base(dir.path()), std::future::pending::<()>())
            .await
            .unwrap();

        let day = date_folder(&local_time(1_709_620_200).unwrap());
        let saved = files_under(dir.path());
        assert_eq!(saved.len(), 1);
        assert!(saved[0].starts_with(dir.path().join("Alice").join(day)));
        assert_eq!(client.count("cleanup"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_client_stops_receiving() {
        let dir = tempdir().unwrap();
        let client = FakeClient {
            hold_sink: true,
            stopped: AtomicBool::new(true),
            ..FakeClient::default()
        };

        run(&client, &config_with_base(dir.path()), std::future::pending::<()>())
            .await
            .unwrap();

        assert_eq!(client.count("register_callback"), 1);
        assert_eq!(client.count("cleanup"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_still_archives_delivered_messages() {
        let dir = tempdir().unwrap();
        let client = FakeClient {
            hold_sink: true,
            stopped: AtomicBool::new(true),
            names: HashMap::from([("wxid_alice".to_string(), "Alice".to_string())]),
            queued: Mutex::new(vec![
                message(1, MessageKind::Image, "wxid_alice"),
                message(2, MessageKind::Image, "wxid_alice"),
                message(3, MessageKind::Image, "wxid_alice"),
            ]),
            ..FakeClient::default()
        };

        run(&client, &config_with_base(dir.path()), std::future::pending::<()>())
            .await
            .unwrap();

        assert_eq!(files_under(dir.path()).len(), 3);
        assert_eq!(client.count("cleanup"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_listen() {
        let dir = tempdir().unwrap();
        let client = FakeClient {
            hold_sink: true,
            ..FakeClient::default()
        };
        let shutdown = tokio::time::sleep(Duration::from_secs(30));

        run(&client, &config_with_base(dir.path()), shutdown)
            .await
            .unwrap();

        assert_eq!(client.count("register_callback"), 1);
        assert_eq!(client.count("cleanup"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_waiting_for_login() {
        let dir = tempdir().unwrap();
        let client = FakeClient {
            never_login: true,
            ..FakeClient::default()
        };
        let shutdown = tokio::time::sleep(Duration::from_secs(2));

        run(&client, &config_with_base(dir.path()), shutdown)
            .await
            .unwrap();

        assert_eq!(client.count("register_callback"), 0);
        assert_eq!(client.count("cleanup"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_still_cleans_up() {
        let dir = tempdir().unwrap();
        let client = FakeClient {
            enable_failures: AtomicUsize::new(10),
            ..FakeClient::default()
        };

        let result = run(&client, &config_with_base(dir.path()), std::future::pending::<()>()).await;

        assert!(result.is_err());
        assert_eq!(client.count("cleanup"), 1);
        assert!(files_under(dir.path()).is_empty());
    }
}

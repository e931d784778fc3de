//! HTTP client for the local WeChat automation gateway.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use wxarchive_core::client::{MessageSink, WechatClient};
use wxarchive_core::config::GatewayConfig;
use wxarchive_core::message::InboundMessage;

mod types;

pub use types::{
    Contact, Envelope, LoginState, ReceivingState, SaveImageRequest, SavedImage, WireMessage,
};

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: Url,
    poll_timeout: Duration,
    request_timeout: Duration,
    poller: Arc<Mutex<Option<CancellationToken>>>,
}

impl GatewayClient {
    /// # Errors
    /// Returns an error if `base_url` is not an http(s) URL.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let base_url = Url::parse(config.base_url.trim())
            .with_context(|| format!("Invalid gateway.base_url '{}'", config.base_url))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            bail!(
                "gateway.base_url must use http or https, got '{}'",
                base_url.scheme()
            );
        }

        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            poll_timeout: config.poll_timeout(),
            request_timeout: config.request_timeout(),
            poller: Arc::new(Mutex::new(None)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Long-polls the gateway for queued messages.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-zero gateway status.
    pub async fn get_messages(&self) -> Result<Vec<InboundMessage>> {
        let mut url = self.endpoint(&["messages"])?;
        url.query_pairs_mut()
            .append_pair("timeout", &self.poll_timeout.as_secs().to_string());
        let request = self
            .http
            .get(url)
            .timeout(self.poll_timeout + self.request_timeout);
        // Entries are decoded one by one so a malformed event cannot drop the batch.
        let entries: Option<Vec<Value>> = self.send(request, "messages").await?;
        Ok(decode_messages(entries.unwrap_or_default()))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("gateway.base_url cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Option<T>> {
        let url = self.endpoint(segments)?;
        let request = self.http.get(url).timeout(self.request_timeout);
        self.send(request, &segments.join("/")).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<Option<T>> {
        let url = self.endpoint(segments)?;
        let request = self
            .http
            .post(url)
            .json(body)
            .timeout(self.request_timeout);
        self.send(request, &segments.join("/")).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<Option<T>> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Gateway request '{endpoint}' failed"))?;

        if !response.status().is_success() {
            bail!(
                "Gateway request '{endpoint}' failed with status {}",
                response.status()
            );
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to decode gateway response for '{endpoint}'"))?;
        envelope
            .into_data()
            .with_context(|| format!("Gateway rejected '{endpoint}'"))
    }

    async fn poll_messages(self, sink: MessageSink, token: CancellationToken) {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                () = sink.closed() => break,
                result = self.get_messages() => {
                    let messages = match result {
                        Ok(messages) => messages,
                        Err(err) => {
                            warn!("Gateway polling error: {err:#}");
                            tokio::select! {
                                () = token.cancelled() => break,
                                () = tokio::time::sleep(POLL_ERROR_BACKOFF) => continue,
                            }
                        }
                    };

                    for message in messages {
                        if sink.send(message).is_err() {
                            debug!("Message sink closed, stopping poller");
                            return;
                        }
                    }
                }
            }
        }
        debug!("Message poller stopped");
    }

    fn stop_poller(&self) {
        let token = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    fn poller_running(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

fn decode_messages(entries: Vec<Value>) -> Vec<InboundMessage> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<WireMessage>(entry) {
            Ok(wire) => Some(InboundMessage::from(wire)),
            Err(err) => {
                warn!("Skipping undecodable gateway message: {err}");
                None
            }
        })
        .collect()
}

/// Moves a file the gateway wrote elsewhere to `to`.
///
/// Falls back to copy and delete when the paths are on different
/// filesystems.
fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) => {
            debug!(
                "Rename {} -> {} failed ({err}), copying instead",
                from.display(),
                to.display()
            );
            copy_then_remove(from, to)
        }
    }
}

fn copy_then_remove(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    // The image is archived at this point; a stale source file is only noise.
    if let Err(err) = fs::remove_file(from) {
        warn!("Failed to remove {} after copying: {err}", from.display());
    }
    Ok(())
}

impl WechatClient for GatewayClient {
    async fn is_login(&self) -> Result<bool> {
        let state: Option<LoginState> = self.get(&["login"]).await?;
        Ok(state.is_some_and(|state| state.login))
    }

    async fn enable_receiving(&self) -> Result<()> {
        let _: Option<Value> = self.post(&["receiving", "enable"], &json!({})).await?;
        Ok(())
    }

    async fn disable_receiving(&self) -> Result<()> {
        let _: Option<Value> = self.post(&["receiving", "disable"], &json!({})).await?;
        Ok(())
    }

    async fn is_receiving(&self) -> bool {
        if !self.poller_running() {
            return false;
        }
        match self.get::<ReceivingState>(&["receiving"]).await {
            Ok(state) => state.is_some_and(|state| state.receiving),
            // Transient transport errors are retried by the poller.
            Err(err) => {
                debug!("Receiving status check failed: {err:#}");
                true
            }
        }
    }

    async fn register_callback(&self, sink: MessageSink) -> Result<()> {
        let token = CancellationToken::new();
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let client = self.clone();
        tokio::spawn(client.poll_messages(sink, token));
        Ok(())
    }

    async fn lookup_display_name(&self, id: &str) -> Option<String> {
        match self.get::<Contact>(&["contacts", id]).await {
            Ok(contact) => contact
                .map(|contact| contact.name)
                .filter(|name| !name.is_empty()),
            Err(err) => {
                debug!("Contact lookup for {id} failed: {err:#}");
                None
            }
        }
    }

    async fn save_image(&self, message: &InboundMessage, destination: &Path) -> bool {
        let dst = destination.to_string_lossy();
        let request = SaveImageRequest {
            id: message.id,
            extra: &message.payload.extra,
            thumb: &message.payload.thumb,
            dst: &dst,
            timeout: self.request_timeout.as_secs(),
        };

        let saved: Option<SavedImage> = match self.post(&["save-image"], &request).await {
            Ok(saved) => saved,
            Err(err) => {
                warn!("Gateway could not save image {}: {err:#}", message.id);
                return false;
            }
        };

        // Some clients ignore the requested name and report where they wrote the file.
        match saved.map(|saved| saved.path).filter(|path| !path.is_empty()) {
            Some(path) if Path::new(&path) != destination => {
                match move_into_place(Path::new(&path), destination) {
                    Ok(()) => true,
                    Err(err) => {
                        warn!("{err:#}");
                        false
                    }
                }
            }
            _ => true,
        }
    }

    async fn cleanup(&self) {
        self.stop_poller();
        if let Err(err) = self.disable_receiving().await {
            debug!("Disable receiving during cleanup failed: {err:#}");
        }
        let cleanup: Result<Option<Value>> = self.post(&["cleanup"], &json!({})).await;
        match cleanup {
            Ok(_) => info!("Gateway resources released"),
            Err(err) => debug!("Gateway cleanup failed: {err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use wxarchive_core::message::MessageKind;

    use super::*;

    #[test]
    fn test_decode_messages_skips_bad_entries() {
        let entries = vec![
            json!({"id": 1, "type": 3, "sender": "wxid_a", "ts": 1_709_620_200}),
            json!({"id": 2, "type": 10000, "sender": null, "ts": 1_709_620_200}),
            json!("garbage"),
            json!({"id": 3, "type": 1, "sender": "wxid_b", "ts": 1_709_620_201}),
        ];

        let messages = decode_messages(entries);

        let ids: Vec<u64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(messages[0].kind, MessageKind::Image);
    }

    #[test]
    fn test_copy_then_remove_moves_file() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("cache.jpg");
        let to = dir.path().join("archive.jpg");
        fs::write(&from, b"jpeg").unwrap();

        copy_then_remove(&from, &to).unwrap();

        assert_eq!(fs::read(&to).unwrap(), b"jpeg");
        assert!(!from.exists());
    }

    #[test]
    fn test_copy_then_remove_reports_missing_source() {
        let dir = tempdir().unwrap();
        let to = dir.path().join("archive.jpg");

        let err = copy_then_remove(&dir.path().join("missing.jpg"), &to).unwrap_err();

        assert!(err.to_string().contains("Failed to copy"));
        assert!(!to.exists());
    }

    #[test]
    fn test_move_into_place_same_filesystem() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("cache.jpg");
        let to = dir.path().join("archive.jpg");
        fs::write(&from, b"jpeg").unwrap();

        move_into_place(&from, &to).unwrap();

        assert!(to.exists());
        assert!(!from.exists());
    }
}

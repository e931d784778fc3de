//! Capability interface for the external WeChat automation client.
//!
//! The archiver and session only talk to the client through this trait, so
//! the concrete transport (gateway, test fake) is injected at construction.

use std::path::Path;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::message::InboundMessage;

/// Channel the client pushes received messages into, one per invocation.
pub type MessageSink = mpsc::UnboundedSender<InboundMessage>;

#[allow(async_fn_in_trait)]
pub trait WechatClient {
    /// Whether WeChat is currently logged in.
    async fn is_login(&self) -> Result<bool>;

    async fn enable_receiving(&self) -> Result<()>;

    async fn disable_receiving(&self) -> Result<()>;

    /// Whether the client is still delivering messages.
    async fn is_receiving(&self) -> bool;

    /// Registers `sink` as the message callback. Replaces any earlier sink.
    async fn register_callback(&self, sink: MessageSink) -> Result<()>;

    /// Resolves an account or group id to its display name.
    async fn lookup_display_name(&self, id: &str) -> Option<String>;

    /// Saves the message's image to `destination`. Returns false on failure.
    async fn save_image(&self, message: &InboundMessage, destination: &Path) -> bool;

    /// Stops receiving and releases client resources.
    ///
    /// Safe to call more than once and after a partial startup.
    async fn cleanup(&self);
}

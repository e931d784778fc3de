use tracing::{debug, error, info, warn};
use wxarchive_core::archive::{ArchiveOutcome, Archiver};
use wxarchive_core::client::WechatClient;
use wxarchive_core::message::InboundMessage;

/// Runs one message through the archiver and logs the outcome.
///
/// Never fails: errors are logged and the listener moves on to the next
/// message.
pub async fn handle_message<C: WechatClient>(archiver: &Archiver<'_, C>, message: &InboundMessage) {
    info!(
        "Received message - id: {}, type: {}, sender: {}",
        message.id, message.kind, message.sender
    );

    match archiver.process(message).await {
        Ok(ArchiveOutcome::Ignored(reason)) => {
            debug!("Ignored message {}: {reason:?}", message.id);
        }
        Ok(ArchiveOutcome::SenderUnresolved { sender }) => {
            warn!("Cannot get sender info for wxid: {sender}");
        }
        Ok(ArchiveOutcome::Saved { path }) => {
            info!(
                "Successfully saved image from {} to {}",
                message.sender,
                path.display()
            );
        }
        Ok(ArchiveOutcome::SaveFailed { path }) => {
            error!(
                "Failed to save image from {} to {}",
                message.sender,
                path.display()
            );
        }
        Err(err) => {
            error!("Error processing message {}: {err:#}", message.id);
        }
    }
}

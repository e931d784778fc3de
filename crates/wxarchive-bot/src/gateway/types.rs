use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use wxarchive_core::message::{ImagePayload, InboundMessage, MessageKind, Origin};

/// Response wrapper used by every gateway endpoint. `status == 0` is success.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub status: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn into_data(self) -> Result<Option<T>> {
        if self.status != 0 {
            let message = if self.message.is_empty() {
                "gateway error".to_string()
            } else {
                self.message
            };
            bail!("{} (status {})", message, self.status);
        }
        Ok(self.data)
    }
}

#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: u32,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub is_group: bool,
    pub sender: String,
    #[serde(default)]
    pub roomid: String,
    pub ts: i64,
    #[serde(default)]
    pub extra: String,
    #[serde(default)]
    pub thumb: String,
}

impl From<WireMessage> for InboundMessage {
    fn from(wire: WireMessage) -> Self {
        // Group flag without a room id cannot be attributed to a group folder.
        let origin = if wire.is_group && !wire.roomid.is_empty() {
            Origin::Group {
                room_id: wire.roomid,
            }
        } else {
            Origin::Direct
        };
        InboundMessage {
            id: wire.id,
            kind: MessageKind::from_code(wire.kind),
            sender: wire.sender,
            origin,
            is_self: wire.is_self,
            timestamp: wire.ts,
            payload: ImagePayload {
                extra: wire.extra,
                thumb: wire.thumb,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginState {
    pub login: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReceivingState {
    pub receiving: bool,
}

#[derive(Debug, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SavedImage {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct SaveImageRequest<'a> {
    pub id: u64,
    pub extra: &'a str,
    pub thumb: &'a str,
    pub dst: &'a str,
    pub timeout: u64,
}

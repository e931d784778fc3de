//! Inbound message model as delivered by the automation client.

use std::fmt;

/// Message type codes used by the WeChat client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    ContactCard,
    Video,
    Emoji,
    Location,
    App,
    System,
    Other(u32),
}

impl MessageKind {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => MessageKind::Text,
            3 => MessageKind::Image,
            34 => MessageKind::Voice,
            42 => MessageKind::ContactCard,
            43 => MessageKind::Video,
            47 => MessageKind::Emoji,
            48 => MessageKind::Location,
            49 => MessageKind::App,
            10000 => MessageKind::System,
            other => MessageKind::Other(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            MessageKind::Text => 1,
            MessageKind::Image => 3,
            MessageKind::Voice => 34,
            MessageKind::ContactCard => 42,
            MessageKind::Video => 43,
            MessageKind::Emoji => 47,
            MessageKind::Location => 48,
            MessageKind::App => 49,
            MessageKind::System => 10000,
            MessageKind::Other(code) => code,
        }
    }

    pub fn is_image(self) -> bool {
        matches!(self, MessageKind::Image)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Other(code) => write!(f, "other({code})"),
            kind => write!(f, "{kind:?}({})", kind.code()),
        }
    }
}

/// Where a message came from. Group messages always carry their room id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Direct,
    Group { room_id: String },
}

impl Origin {
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Origin::Direct => None,
            Origin::Group { room_id } => Some(room_id),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Origin::Group { .. })
    }
}

/// Opaque handles the client uses to locate the image data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePayload {
    pub extra: String,
    pub thumb: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: u64,
    pub kind: MessageKind,
    /// Sender wxid
    pub sender: String,
    pub origin: Origin,
    /// Sent by the logged-in account
    pub is_self: bool,
    /// Unix seconds
    pub timestamp: i64,
    pub payload: ImagePayload,
}

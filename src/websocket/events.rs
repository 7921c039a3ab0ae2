//! Realtime event vocabulary
//!
//! Outbound events use the "object.action" naming convention and serialize to
//! one flat JSON object whose `type` field carries the event name:
//!
//! ```json
//! { "type": "message.delivered", "conversation_id": "...", "message_id": "...", "delivered_at": "..." }
//! ```
//!
//! Inbound commands use the same flat shape with a bare verb (`send`, `read`,
//! `typing`) as their `type`.

use crate::models::{EnergyLevel, Message, MessageType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events pushed from the server to connected clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    /// A message was created (sender echo) or reached its recipient
    #[serde(rename = "message.new")]
    MessageNew {
        conversation_id: Uuid,
        message: Message,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        client_correlation_token: Option<String>,
    },

    #[serde(rename = "message.delivered")]
    MessageDelivered {
        conversation_id: Uuid,
        message_id: Uuid,
        delivered_at: DateTime<Utc>,
    },

    /// One per markRead call; `message_id` is the watermark
    #[serde(rename = "message.read_receipt")]
    MessageReadReceipt {
        conversation_id: Uuid,
        message_id: Uuid,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "message.typing")]
    MessageTyping {
        conversation_id: Uuid,
        identity: Uuid,
        display_name: String,
    },

    #[serde(rename = "presence.online")]
    PresenceOnline { identity: Uuid },

    #[serde(rename = "presence.offline")]
    PresenceOffline {
        identity: Uuid,
        last_seen: DateTime<Utc>,
    },

    #[serde(rename = "presence.state_changed")]
    PresenceStateChanged {
        identity: Uuid,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        energy_level: Option<EnergyLevel>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        do_not_disturb_active: Option<bool>,
    },

    #[serde(rename = "conversation.unhidden")]
    ConversationUnhidden { conversation_id: Uuid },
}

impl OutboundEvent {
    /// Get event type as string (e.g., "message.new")
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageNew { .. } => "message.new",
            Self::MessageDelivered { .. } => "message.delivered",
            Self::MessageReadReceipt { .. } => "message.read_receipt",
            Self::MessageTyping { .. } => "message.typing",
            Self::PresenceOnline { .. } => "presence.online",
            Self::PresenceOffline { .. } => "presence.offline",
            Self::PresenceStateChanged { .. } => "presence.state_changed",
            Self::ConversationUnhidden { .. } => "conversation.unhidden",
        }
    }

    /// Serialize to the text frame written to the socket.
    ///
    /// This is the only place outbound serialization happens.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Commands a client sends over its realtime connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundCommand {
    Send {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        message_type: Option<MessageType>,
        #[serde(default)]
        client_correlation_token: Option<String>,
    },
    Read {
        conversation_id: Uuid,
        message_id: Uuid,
    },
    Typing {
        conversation_id: Uuid,
    },
}

impl InboundCommand {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Send { .. } => "send",
            Self::Read { .. } => "read",
            Self::Typing { .. } => "typing",
        }
    }
}

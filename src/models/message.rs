use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Emoji,
    System,
}

impl MessageType {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "emoji" => Some(Self::Emoji),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Emoji => "emoji",
            Self::System => "system",
        }
    }
}

/// Delivery status with a natural forward order: Queued < Sent < Delivered < Read
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued = 0,
    Sent = 1,
    Delivered = 2,
    Read = 3,
}

impl MessageStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// Status only moves forward. A queued message has to be released
    /// (sent or delivered) before anyone can read it.
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Read) => false,
            (current, next) => next > *current,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

/// Why a message was held back instead of delivered immediately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuedReason {
    /// Released only by the recipient turning do-not-disturb off
    RecipientCalmMode,
    /// Released by the sweep once `deliver_at` has passed
    OutsideTimeBoundary,
}

impl QueuedReason {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "recipient_calm_mode" => Some(Self::RecipientCalmMode),
            "outside_time_boundary" => Some(Self::OutsideTimeBoundary),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::RecipientCalmMode => "recipient_calm_mode",
            Self::OutsideTimeBoundary => "outside_time_boundary",
        }
    }
}

impl fmt::Display for QueuedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

/// Message row as stored in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_reason: Option<QueuedReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliver_at: Option<DateTime<Utc>>,
    /// Per-conversation creation order, starting at 1
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_queued(&self) -> bool {
        self.status == MessageStatus::Queued
    }
}

/// Everything the ledger needs to create a message; id, sequence number and
/// timestamps are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub queued_reason: Option<QueuedReason>,
    pub deliver_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

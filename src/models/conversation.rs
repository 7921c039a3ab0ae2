use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Blocked,
    Archived,
}

impl ConversationStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "blocked" => Some(Self::Blocked),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Archived => "archived",
        }
    }
}

/// Direct conversation between exactly two participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participants: [Uuid; 2],
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, identity: Uuid) -> bool {
        self.participants.contains(&identity)
    }

    /// The participant that is not `identity`, or None if `identity` is not in the pair.
    pub fn other_participant(&self, identity: Uuid) -> Option<Uuid> {
        match self.participants {
            [a, b] if a == identity => Some(b),
            [a, b] if b == identity => Some(a),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConversationStatus::Active
    }
}

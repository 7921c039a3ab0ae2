pub mod availability;
pub mod conversation;
pub mod message;

pub use availability::{EnergyLevel, RecipientAvailability, TimeBoundary};
pub use conversation::{Conversation, ConversationStatus};
pub use message::{Message, MessageStatus, MessageType, NewMessage, QueuedReason};

//! Delivery and read receipts
//!
//! A delivery receipt needs the recipient to hold a live connection at the
//! moment of delivery. A read receipt is a user action and goes out whether or
//! not the original sender is connected. Either way the status change is
//! committed before anyone is notified, and a failed notification never
//! undoes it.

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Message, MessageStatus};
use crate::services::message_ledger::MessageLedger;
use crate::websocket::events::OutboundEvent;
use crate::websocket::registry::{GroupKey, PresenceRegistry};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Result of one markRead call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub conversation_id: Uuid,
    /// Message the call was made with
    pub watermark: Uuid,
    /// Messages that moved to `read` during this call
    pub advanced: Vec<Uuid>,
    pub read_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ReceiptPropagator {
    registry: PresenceRegistry,
    ledger: Arc<dyn MessageLedger>,
    clock: Arc<dyn Clock>,
}

impl ReceiptPropagator {
    pub fn new(
        registry: PresenceRegistry,
        ledger: Arc<dyn MessageLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            ledger,
            clock,
        }
    }

    /// Advance a just-delivered `sent` message to `delivered` when its
    /// recipient is online right now, and tell the sender.
    ///
    /// Returns the updated message, or None if nothing changed.
    pub async fn confirm_delivery(&self, message: &Message) -> Option<Message> {
        if message.status != MessageStatus::Sent || !self.registry.is_online(message.recipient_id)
        {
            return None;
        }

        let at = self.clock.now();
        let updated = match self
            .ledger
            .advance_status(message.id, MessageStatus::Sent, MessageStatus::Delivered, at)
            .await
        {
            Ok(Some(updated)) => updated,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(message_id = %message.id, error = %e, "failed to mark message delivered");
                return None;
            }
        };

        let event = OutboundEvent::MessageDelivered {
            conversation_id: updated.conversation_id,
            message_id: updated.id,
            delivered_at: updated.delivered_at.unwrap_or(at),
        };
        match event.to_frame() {
            Ok(frame) => {
                self.registry
                    .deliver(GroupKey::Identity(updated.sender_id), &frame, None);
            }
            Err(e) => tracing::warn!(message_id = %updated.id, error = %e, "failed to encode delivery receipt"),
        }

        Some(updated)
    }

    /// Mark the reader's unread messages up to and including `message_id` as
    /// read, then send one receipt to the other participant.
    ///
    /// A watermark at or behind what is already read is accepted and changes
    /// nothing; no receipt goes out in that case.
    pub async fn mark_read(
        &self,
        reader: Uuid,
        conversation: &Conversation,
        message_id: Uuid,
    ) -> AppResult<ReadOutcome> {
        let other = conversation
            .other_participant(reader)
            .ok_or(AppError::NotParticipant)?;

        let watermark = self
            .ledger
            .get(message_id)
            .await?
            .filter(|m| m.conversation_id == conversation.id)
            .ok_or(AppError::MessageNotFound)?;

        let read_at = self.clock.now();
        let advanced = self
            .ledger
            .mark_read_up_to(conversation.id, reader, watermark.sequence_number, read_at)
            .await?;

        if !advanced.is_empty() {
            let event = OutboundEvent::MessageReadReceipt {
                conversation_id: conversation.id,
                message_id: watermark.id,
                read_at,
            };
            match event.to_frame() {
                Ok(frame) => {
                    self.registry.deliver(GroupKey::Identity(other), &frame, None);
                }
                Err(e) => tracing::warn!(conversation_id = %conversation.id, error = %e, "failed to encode read receipt"),
            }
        }

        tracing::debug!(
            user_id = %reader,
            conversation_id = %conversation.id,
            advanced = advanced.len(),
            "read watermark applied"
        );

        Ok(ReadOutcome {
            conversation_id: conversation.id,
            watermark: watermark.id,
            advanced,
            read_at,
        })
    }
}

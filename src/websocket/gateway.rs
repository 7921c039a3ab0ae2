//! Realtime fan-out gateway
//!
//! Owns the inbound command handling (send, read, typing) and every outbound
//! broadcast. Rejections come back to the caller as `AppError`; broadcast-side
//! failures are logged here and never escape.

use crate::clock::Clock;
use crate::config::PolicyConfig;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{EnergyLevel, Message, MessageType, NewMessage};
use crate::services::activity::{self, DailyCounter};
use crate::services::delivery_policy::{DeliveryDecision, DeliveryPolicy};
use crate::services::identity::AuthenticatedIdentity;
use crate::services::receipts::{ReadOutcome, ReceiptPropagator};
use crate::services::Collaborators;
use crate::websocket::events::{InboundCommand, OutboundEvent};
use crate::websocket::registry::{ConnectionId, Departure, GroupKey, PresenceRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// What the sender learns about an accepted message
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub message: Message,
    pub decision: DeliveryDecision,
}

/// Message content plus optional client metadata for one send
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub conversation_id: Uuid,
    pub content: String,
    pub message_type: Option<MessageType>,
    pub client_correlation_token: Option<String>,
}

#[derive(Clone)]
pub struct FanoutGateway {
    registry: PresenceRegistry,
    deps: Collaborators,
    receipts: ReceiptPropagator,
    clock: Arc<dyn Clock>,
    policy: DeliveryPolicy,
    max_message_length: usize,
}

impl FanoutGateway {
    pub fn new(
        registry: PresenceRegistry,
        deps: Collaborators,
        clock: Arc<dyn Clock>,
        policy: PolicyConfig,
        max_message_length: usize,
    ) -> Self {
        let receipts = ReceiptPropagator::new(registry.clone(), deps.ledger.clone(), clock.clone());
        Self {
            registry,
            deps,
            receipts,
            clock,
            policy: DeliveryPolicy::new(policy),
            max_message_length,
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Authenticate a new connection and register it.
    ///
    /// On success the connection sits in its identity's personal group and in
    /// the group of every active conversation the identity participates in.
    /// Only the identity's first connection announces `presence.online`.
    pub async fn on_connect(
        &self,
        connection_id: ConnectionId,
        sink: UnboundedSender<String>,
        credential: Option<&str>,
    ) -> AppResult<AuthenticatedIdentity> {
        let credential = credential.ok_or(AppError::MissingCredential)?;
        let identity = self.deps.identity.resolve(credential).await?;

        let conversations = match self
            .deps
            .conversations
            .list_active_conversations(identity.user_id)
            .await
        {
            Ok(list) => list,
            Err(e) => {
                // Groups are joined lazily on the next message, so the
                // connection is still usable.
                tracing::warn!(user_id = %identity.user_id, error = %e, "failed to list conversations on connect");
                Vec::new()
            }
        };

        let registration =
            self.registry
                .register(connection_id, identity.user_id, sink, &conversations);

        if registration.came_online {
            self.broadcast_presence(
                identity.user_id,
                &OutboundEvent::PresenceOnline {
                    identity: identity.user_id,
                },
            );
        }
        self.refresh_presence_gauges();

        tracing::info!(
            user_id = %identity.user_id,
            connection_id = %connection_id,
            conversations = conversations.len(),
            came_online = registration.came_online,
            "realtime connection authenticated"
        );
        Ok(identity)
    }

    /// Remove a connection; the last one for an identity announces
    /// `presence.offline` exactly once.
    pub fn on_disconnect(&self, connection_id: ConnectionId) -> Option<Departure> {
        let departure = self.registry.deregister(connection_id)?;

        if departure.went_offline {
            let event = OutboundEvent::PresenceOffline {
                identity: departure.identity,
                last_seen: self.clock.now(),
            };
            let mut groups = vec![GroupKey::Identity(departure.identity)];
            groups.extend(departure.conversations.iter().map(|c| GroupKey::Conversation(*c)));
            self.emit(&groups, &event, None);
        }
        self.refresh_presence_gauges();

        tracing::info!(
            user_id = %departure.identity,
            connection_id = %connection_id,
            went_offline = departure.went_offline,
            "realtime connection closed"
        );
        Some(departure)
    }

    /// Dispatch one inbound command from an authenticated connection.
    pub async fn handle_command(
        &self,
        identity: &AuthenticatedIdentity,
        command: InboundCommand,
    ) -> AppResult<()> {
        match command {
            InboundCommand::Send {
                conversation_id,
                content,
                message_type,
                client_correlation_token,
            } => {
                self.send(
                    identity.user_id,
                    SendRequest {
                        conversation_id,
                        content,
                        message_type,
                        client_correlation_token,
                    },
                )
                .await?;
            }
            InboundCommand::Read {
                conversation_id,
                message_id,
            } => {
                self.mark_read(identity.user_id, conversation_id, message_id)
                    .await?;
            }
            InboundCommand::Typing { conversation_id } => {
                self.typing(identity, conversation_id).await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    /// Create a message and route it per the recipient's availability.
    pub async fn send(&self, sender: Uuid, request: SendRequest) -> AppResult<SendOutcome> {
        match self.try_send(sender, request).await {
            Ok(outcome) => {
                metrics::record_message_accepted(outcome.decision.outcome_label());
                Ok(outcome)
            }
            Err(e) => {
                metrics::record_send_rejected(e.error_code());
                Err(e)
            }
        }
    }

    async fn try_send(&self, sender: Uuid, request: SendRequest) -> AppResult<SendOutcome> {
        self.validate_content(&request.content)?;

        let conversation = self
            .deps
            .conversations
            .get_conversation(request.conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let recipient = conversation
            .other_participant(sender)
            .ok_or(AppError::NotParticipant)?;
        if recipient == sender {
            return Err(AppError::SelfAddressed);
        }
        if !conversation.is_active() {
            return Err(match conversation.status {
                crate::models::ConversationStatus::Blocked => AppError::ConversationBlocked,
                _ => AppError::ConversationInactive,
            });
        }
        if self.deps.conversations.is_blocked(sender, recipient).await? {
            return Err(AppError::ConversationBlocked);
        }

        let availability = self.deps.availability.get_availability(recipient).await?;
        let now = self.clock.now();
        let decision = self.policy.evaluate(&availability, now);

        let message = self
            .deps
            .ledger
            .insert(NewMessage {
                conversation_id: conversation.id,
                sender_id: sender,
                recipient_id: recipient,
                content: request.content,
                message_type: request.message_type.unwrap_or_default(),
                status: decision.initial_status(),
                queued_reason: decision.queued_reason(),
                deliver_at: decision.deliver_at(),
                created_at: now,
            })
            .await?;

        tracing::info!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            sender_id = %sender,
            recipient_id = %recipient,
            outcome = decision.outcome_label(),
            "message accepted"
        );

        // Sender's devices see the message with its status and queued reason
        self.registry.join_conversation(sender, conversation.id);
        self.emit(
            &[GroupKey::Identity(sender)],
            &OutboundEvent::MessageNew {
                conversation_id: conversation.id,
                message: message.clone(),
                client_correlation_token: request.client_correlation_token,
            },
            None,
        );

        activity::report(
            "messages_sent",
            sender,
            self.deps
                .activity
                .increment(sender, now.date_naive(), DailyCounter::MessagesSent, 1),
        )
        .await;

        let message = if decision.is_queued() {
            message
        } else {
            self.deliver_to_recipient(message).await
        };

        Ok(SendOutcome { message, decision })
    }

    fn validate_content(&self, content: &str) -> AppResult<()> {
        if content.trim().is_empty() {
            return Err(AppError::EmptyContent);
        }
        if content.chars().count() > self.max_message_length {
            return Err(AppError::ContentTooLong {
                max: self.max_message_length,
            });
        }
        Ok(())
    }

    /// Recipient side of a live or released message: lazy group join, unhide,
    /// `message.new`, then the delivery receipt if the recipient is online.
    async fn deliver_to_recipient(&self, message: Message) -> Message {
        let recipient = message.recipient_id;
        let conversation_id = message.conversation_id;

        self.registry.join_conversation(recipient, conversation_id);

        match self.deps.conversations.unhide_for(recipient, conversation_id).await {
            Ok(true) => {
                self.emit(
                    &[GroupKey::Identity(recipient)],
                    &OutboundEvent::ConversationUnhidden { conversation_id },
                    None,
                );
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(user_id = %recipient, conversation_id = %conversation_id, error = %e, "failed to unhide conversation");
            }
        }

        self.emit(
            &[GroupKey::Identity(recipient)],
            &OutboundEvent::MessageNew {
                conversation_id,
                message: message.clone(),
                client_correlation_token: None,
            },
            None,
        );

        activity::report(
            "messages_received",
            recipient,
            self.deps.activity.increment(
                recipient,
                self.clock.now().date_naive(),
                DailyCounter::MessagesReceived,
                1,
            ),
        )
        .await;

        self.receipts
            .confirm_delivery(&message)
            .await
            .unwrap_or(message)
    }

    /// Push a batch of just-released messages to one recipient, in order.
    ///
    /// The batch must already be out of `queued`; this only broadcasts.
    pub async fn release(&self, recipient: Uuid, batch: Vec<Message>) -> Vec<Message> {
        let mut delivered = Vec::with_capacity(batch.len());
        for message in batch {
            if message.recipient_id != recipient {
                tracing::warn!(
                    message_id = %message.id,
                    recipient_id = %recipient,
                    "released message addressed to another recipient, skipping"
                );
                continue;
            }
            delivered.push(self.deliver_to_recipient(message).await);
        }
        delivered
    }

    // ------------------------------------------------------------------
    // Read receipts and typing
    // ------------------------------------------------------------------

    pub async fn mark_read(
        &self,
        reader: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<ReadOutcome> {
        let conversation = self
            .deps
            .conversations
            .get_conversation(conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !conversation.has_participant(reader) {
            return Err(AppError::NotParticipant);
        }
        self.receipts.mark_read(reader, &conversation, message_id).await
    }

    /// Broadcast a typing indicator to the conversation group, skipping every
    /// connection of the typist. No server-side timer is kept.
    pub async fn typing(
        &self,
        identity: &AuthenticatedIdentity,
        conversation_id: Uuid,
    ) -> AppResult<usize> {
        let user_id = identity.user_id;
        if !self.registry.conversations_of(user_id).contains(&conversation_id) {
            let conversation = self
                .deps
                .conversations
                .get_conversation(conversation_id)
                .await?
                .ok_or(AppError::NotFound)?;
            if !conversation.has_participant(user_id) {
                return Err(AppError::NotParticipant);
            }
            self.registry.join_conversation(user_id, conversation_id);
        }

        Ok(self.emit(
            &[GroupKey::Conversation(conversation_id)],
            &OutboundEvent::MessageTyping {
                conversation_id,
                identity: user_id,
                display_name: identity.display_name.clone(),
            },
            Some(user_id),
        ))
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// Deliver an event to the identity's own devices and to every
    /// conversation group the identity currently has a live presence in.
    pub fn broadcast_presence(&self, identity: Uuid, event: &OutboundEvent) -> usize {
        let mut groups = vec![GroupKey::Identity(identity)];
        groups.extend(
            self.registry
                .conversations_of(identity)
                .into_iter()
                .map(GroupKey::Conversation),
        );
        self.emit(&groups, event, None)
    }

    pub fn broadcast_state_change(
        &self,
        identity: Uuid,
        energy_level: Option<EnergyLevel>,
        do_not_disturb_active: Option<bool>,
    ) -> usize {
        self.broadcast_presence(
            identity,
            &OutboundEvent::PresenceStateChanged {
                identity,
                energy_level,
                do_not_disturb_active,
            },
        )
    }

    /// Push an `error` event to a single connection
    pub fn send_error(&self, connection_id: ConnectionId, error: &AppError) {
        if !self.registry.send_to(connection_id, &error.to_event().to_frame()) {
            tracing::debug!(connection_id = %connection_id, "error event not delivered, connection gone");
        }
    }

    fn emit(&self, groups: &[GroupKey], event: &OutboundEvent, exclude: Option<Uuid>) -> usize {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(event = event.event_type(), error = %e, "failed to encode event");
                return 0;
            }
        };
        let unique: HashSet<GroupKey> = groups.iter().copied().collect();
        let unique: Vec<GroupKey> = unique.into_iter().collect();
        let reached = self.registry.deliver_many(&unique, &frame, exclude);
        tracing::debug!(event = event.event_type(), reached, "event fanned out");
        reached
    }

    fn refresh_presence_gauges(&self) {
        metrics::set_presence_gauges(
            self.registry.online_identities(),
            self.registry.open_connections(),
        );
    }
}

//! In-memory collaborators for tests and local runs.
//!
//! Each store keeps its state behind one mutex that is never held across an
//! await, so the conditional transitions behave like the SQL versions.

use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationStatus, EnergyLevel, Message, MessageStatus, NewMessage,
    QueuedReason, TimeBoundary,
};
use crate::services::activity::{ActivityReporter, DailyCounter, GuardianAlert};
use crate::services::availability_store::{AvailabilityStore, DoNotDisturbTransition};
use crate::services::conversation_store::ConversationStore;
use crate::services::identity::{AuthenticatedIdentity, IdentityResolver};
use crate::services::message_ledger::{sort_for_release, MessageLedger};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

// ----------------------------------------------------------------------------
// Message ledger
// ----------------------------------------------------------------------------

#[derive(Default)]
struct LedgerState {
    messages: HashMap<Uuid, Message>,
    counters: HashMap<Uuid, i64>,
}

#[derive(Default)]
pub struct InMemoryMessageLedger {
    state: Mutex<LedgerState>,
    unavailable: AtomicBool,
}

impl InMemoryMessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the database were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable("ledger unavailable".into()));
        }
        Ok(())
    }

    pub fn all(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = lock(&self.state).messages.values().cloned().collect();
        messages.sort_by_key(|m| (m.conversation_id, m.sequence_number));
        messages
    }

    pub fn count(&self) -> usize {
        lock(&self.state).messages.len()
    }

    fn release_where<F>(&self, predicate: F) -> AppResult<Vec<Message>>
    where
        F: Fn(&Message) -> bool,
    {
        self.check_available()?;
        let mut state = lock(&self.state);
        let mut released = Vec::new();
        for message in state.messages.values_mut() {
            if message.status == MessageStatus::Queued && predicate(message) {
                message.status = MessageStatus::Sent;
                released.push(message.clone());
            }
        }
        sort_for_release(&mut released);
        Ok(released)
    }
}

#[async_trait]
impl MessageLedger for InMemoryMessageLedger {
    async fn insert(&self, new: NewMessage) -> AppResult<Message> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let seq = state.counters.entry(new.conversation_id).or_insert(0);
        *seq += 1;
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            recipient_id: new.recipient_id,
            content: new.content,
            message_type: new.message_type,
            status: new.status,
            queued_reason: new.queued_reason,
            deliver_at: new.deliver_at,
            sequence_number: *seq,
            created_at: new.created_at,
            delivered_at: None,
            read_at: None,
        };
        state.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Message>> {
        self.check_available()?;
        Ok(lock(&self.state).messages.get(&id).cloned())
    }

    async fn advance_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        self.check_available()?;
        if !expected.can_advance_to(next) {
            return Ok(None);
        }
        let mut state = lock(&self.state);
        let Some(message) = state.messages.get_mut(&id) else {
            return Ok(None);
        };
        if message.status != expected {
            return Ok(None);
        }
        message.status = next;
        if next == MessageStatus::Delivered {
            message.delivered_at.get_or_insert(at);
        }
        if next == MessageStatus::Read {
            message.read_at.get_or_insert(at);
        }
        Ok(Some(message.clone()))
    }

    async fn release_due(&self, now: DateTime<Utc>) -> AppResult<Vec<Message>> {
        self.release_where(|m| {
            m.queued_reason == Some(QueuedReason::OutsideTimeBoundary)
                && m.deliver_at.map(|at| at <= now).unwrap_or(false)
        })
    }

    async fn release_calm_mode(
        &self,
        recipient: Uuid,
        up_to: DateTime<Utc>,
    ) -> AppResult<Vec<Message>> {
        self.release_where(|m| {
            m.queued_reason == Some(QueuedReason::RecipientCalmMode)
                && m.recipient_id == recipient
                && m.created_at <= up_to
        })
    }

    async fn calm_mode_recipients(&self) -> AppResult<Vec<Uuid>> {
        self.check_available()?;
        let recipients: HashSet<Uuid> = lock(&self.state)
            .messages
            .values()
            .filter(|m| {
                m.status == MessageStatus::Queued
                    && m.queued_reason == Some(QueuedReason::RecipientCalmMode)
            })
            .map(|m| m.recipient_id)
            .collect();
        let mut recipients: Vec<Uuid> = recipients.into_iter().collect();
        recipients.sort();
        Ok(recipients)
    }

    async fn mark_read_up_to(
        &self,
        conversation_id: Uuid,
        reader: Uuid,
        up_to_sequence: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let mut changed = Vec::new();
        for message in state.messages.values_mut() {
            if message.conversation_id == conversation_id
                && message.recipient_id == reader
                && message.sequence_number <= up_to_sequence
                && matches!(message.status, MessageStatus::Sent | MessageStatus::Delivered)
            {
                message.status = MessageStatus::Read;
                message.read_at = Some(at);
                changed.push((message.sequence_number, message.id));
            }
        }
        changed.sort();
        Ok(changed.into_iter().map(|(_, id)| id).collect())
    }
}

// ----------------------------------------------------------------------------
// Conversations
// ----------------------------------------------------------------------------

#[derive(Default)]
struct ConversationState {
    conversations: HashMap<Uuid, Conversation>,
    blocks: HashSet<(Uuid, Uuid)>,
    hidden: HashSet<(Uuid, Uuid)>,
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    state: Mutex<ConversationState>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, a: Uuid, b: Uuid) -> Conversation {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            participants: [a, b],
            status: ConversationStatus::Active,
            created_at: Utc::now(),
        };
        lock(&self.state)
            .conversations
            .insert(conversation.id, conversation.clone());
        conversation
    }

    pub fn set_status(&self, conversation_id: Uuid, status: ConversationStatus) {
        if let Some(c) = lock(&self.state).conversations.get_mut(&conversation_id) {
            c.status = status;
        }
    }

    pub fn block(&self, blocker: Uuid, blocked: Uuid) {
        lock(&self.state).blocks.insert((blocker, blocked));
    }

    pub fn hide(&self, identity: Uuid, conversation_id: Uuid) {
        lock(&self.state).hidden.insert((conversation_id, identity));
    }

    pub fn is_hidden(&self, identity: Uuid, conversation_id: Uuid) -> bool {
        lock(&self.state).hidden.contains(&(conversation_id, identity))
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(lock(&self.state).conversations.get(&conversation_id).cloned())
    }

    async fn list_active_conversations(&self, identity: Uuid) -> AppResult<Vec<Uuid>> {
        let state = lock(&self.state);
        let mut ids: Vec<Uuid> = state
            .conversations
            .values()
            .filter(|c| c.is_active() && c.has_participant(identity))
            .map(|c| c.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn is_blocked(&self, a: Uuid, b: Uuid) -> AppResult<bool> {
        let state = lock(&self.state);
        Ok(state.blocks.contains(&(a, b)) || state.blocks.contains(&(b, a)))
    }

    async fn unhide_for(&self, identity: Uuid, conversation_id: Uuid) -> AppResult<bool> {
        Ok(lock(&self.state).hidden.remove(&(conversation_id, identity)))
    }
}

// ----------------------------------------------------------------------------
// Availability
// ----------------------------------------------------------------------------

#[derive(Default)]
struct AvailabilityState {
    do_not_disturb: HashMap<Uuid, (bool, Option<DateTime<Utc>>)>,
    boundaries: HashMap<Uuid, Vec<TimeBoundary>>,
    energy: HashMap<Uuid, EnergyLevel>,
}

#[derive(Default)]
pub struct InMemoryAvailabilityStore {
    state: Mutex<AvailabilityState>,
    unavailable: AtomicBool,
}

impl InMemoryAvailabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_boundaries(&self, identity: Uuid, boundaries: Vec<TimeBoundary>) {
        lock(&self.state).boundaries.insert(identity, boundaries);
    }

    pub fn energy_level(&self, identity: Uuid) -> Option<EnergyLevel> {
        lock(&self.state).energy.get(&identity).copied()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable("availability store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AvailabilityStore for InMemoryAvailabilityStore {
    async fn get_do_not_disturb(&self, identity: Uuid) -> AppResult<bool> {
        self.check_available()?;
        Ok(lock(&self.state)
            .do_not_disturb
            .get(&identity)
            .map(|(active, _)| *active)
            .unwrap_or(false))
    }

    async fn get_time_boundaries(&self, identity: Uuid) -> AppResult<Vec<TimeBoundary>> {
        self.check_available()?;
        Ok(lock(&self.state)
            .boundaries
            .get(&identity)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_do_not_disturb(
        &self,
        identity: Uuid,
        active: bool,
        at: DateTime<Utc>,
    ) -> AppResult<DoNotDisturbTransition> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let (was_active, activated_at) = state
            .do_not_disturb
            .get(&identity)
            .copied()
            .unwrap_or((false, None));

        let new_activated_at = match (active, was_active) {
            (true, true) => activated_at,
            (true, false) => Some(at),
            (false, _) => None,
        };
        state
            .do_not_disturb
            .insert(identity, (active, new_activated_at));

        Ok(DoNotDisturbTransition {
            changed: was_active != active,
            previously_activated_at: if was_active { activated_at } else { None },
        })
    }

    async fn set_energy_level(
        &self,
        identity: Uuid,
        level: EnergyLevel,
        _at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.check_available()?;
        lock(&self.state).energy.insert(identity, level);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Activity reporting
// ----------------------------------------------------------------------------

#[derive(Default)]
struct ActivityState {
    counters: HashMap<(Uuid, NaiveDate, DailyCounter), i32>,
    alerts: Vec<(Uuid, GuardianAlert)>,
}

#[derive(Default)]
pub struct RecordingActivityReporter {
    state: Mutex<ActivityState>,
}

impl RecordingActivityReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of a counter across all days
    pub fn total(&self, identity: Uuid, counter: DailyCounter) -> i32 {
        lock(&self.state)
            .counters
            .iter()
            .filter(|((id, _, c), _)| *id == identity && *c == counter)
            .map(|(_, v)| *v)
            .sum()
    }

    pub fn alerts(&self) -> Vec<(Uuid, GuardianAlert)> {
        lock(&self.state).alerts.clone()
    }
}

#[async_trait]
impl ActivityReporter for RecordingActivityReporter {
    async fn increment(
        &self,
        identity: Uuid,
        day: NaiveDate,
        counter: DailyCounter,
        amount: i32,
    ) -> AppResult<()> {
        *lock(&self.state)
            .counters
            .entry((identity, day, counter))
            .or_insert(0) += amount;
        Ok(())
    }

    async fn notify_guardians(
        &self,
        identity: Uuid,
        alert: GuardianAlert,
        _at: DateTime<Utc>,
    ) -> AppResult<()> {
        lock(&self.state).alerts.push((identity, alert));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Identity
// ----------------------------------------------------------------------------

/// Resolves a fixed set of opaque tokens
#[derive(Default)]
pub struct StaticIdentityResolver {
    tokens: Mutex<HashMap<String, AuthenticatedIdentity>>,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: &str, user_id: Uuid, display_name: &str) {
        lock(&self.tokens).insert(
            token.to_string(),
            AuthenticatedIdentity {
                user_id,
                display_name: display_name.to_string(),
            },
        );
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, credential: &str) -> AppResult<AuthenticatedIdentity> {
        if credential.trim().is_empty() {
            return Err(AppError::MissingCredential);
        }
        lock(&self.tokens)
            .get(credential)
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

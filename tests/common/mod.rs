//! Shared wiring for the integration tests: the delivery core built around
//! the in-memory collaborators and a manually driven clock.

#![allow(dead_code)]

use chrono::{DateTime, NaiveTime, TimeZone, Utc, Weekday};
use delivery_service::clock::FixedClock;
use delivery_service::config::Config;
use delivery_service::error::AppResult;
use delivery_service::models::{Conversation, TimeBoundary};
use delivery_service::services::memory::{
    InMemoryAvailabilityStore, InMemoryConversationStore, InMemoryMessageLedger,
    RecordingActivityReporter, StaticIdentityResolver,
};
use delivery_service::services::state_events::{apply_state_update, StateUpdate};
use delivery_service::services::{AvailabilityStore, Collaborators};
use delivery_service::state::{AppState, BackgroundTasks};
use delivery_service::websocket::{ConnectionId, FanoutGateway};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

pub struct Harness {
    pub ledger: Arc<InMemoryMessageLedger>,
    pub conversations: Arc<InMemoryConversationStore>,
    pub availability: Arc<InMemoryAvailabilityStore>,
    pub activity: Arc<RecordingActivityReporter>,
    pub identity: Arc<StaticIdentityResolver>,
    pub clock: Arc<FixedClock>,
    pub state: AppState,
    pub background: BackgroundTasks,
}

/// A registered test connection and the frames pushed to it
pub struct Client {
    pub connection_id: ConnectionId,
    pub user_id: Uuid,
    pub rx: UnboundedReceiver<String>,
}

impl Client {
    /// Every frame received so far, parsed
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(serde_json::from_str(&frame).expect("frame is JSON"));
        }
        frames
    }

    pub fn drain_types(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        let ledger = Arc::new(InMemoryMessageLedger::new());
        let conversations = Arc::new(InMemoryConversationStore::new());
        let availability = Arc::new(InMemoryAvailabilityStore::new());
        let activity = Arc::new(RecordingActivityReporter::new());
        let identity = Arc::new(StaticIdentityResolver::new());
        let clock = Arc::new(FixedClock::new(now));

        let deps = Collaborators {
            ledger: ledger.clone(),
            conversations: conversations.clone(),
            availability: availability.clone(),
            identity: identity.clone(),
            activity: activity.clone(),
        };
        let (state, background) =
            AppState::new(Arc::new(Config::test_defaults()), deps, clock.clone());

        Self {
            ledger,
            conversations,
            availability,
            activity,
            identity,
            clock,
            state,
            background,
        }
    }

    pub fn gateway(&self) -> &FanoutGateway {
        &self.state.gateway
    }

    pub fn conversation(&self, a: Uuid, b: Uuid) -> Conversation {
        self.conversations.create(a, b)
    }

    /// Register a bearer token for `user_id` and return it
    pub fn token_for(&self, user_id: Uuid, display_name: &str) -> String {
        let token = format!("token-{user_id}");
        self.identity.insert(&token, user_id, display_name);
        token
    }

    pub async fn connect(&self, user_id: Uuid) -> Client {
        let token = self.token_for(user_id, &format!("user-{}", &user_id.to_string()[..8]));
        let connection_id = ConnectionId::new();
        let (tx, rx) = unbounded_channel();
        self.gateway()
            .on_connect(connection_id, tx, Some(&token))
            .await
            .expect("connect succeeds");
        Client {
            connection_id,
            user_id,
            rx,
        }
    }

    pub async fn set_do_not_disturb(&self, user_id: Uuid, active: bool) {
        self.availability
            .set_do_not_disturb(user_id, active, self.clock_now())
            .await
            .expect("availability store reachable");
    }

    /// Apply a state update the way `PUT /api/v1/state` does
    pub async fn update_state(&self, user_id: Uuid, update: StateUpdate) -> AppResult<StateUpdate> {
        apply_state_update(
            self.availability.as_ref(),
            &self.state.scheduler,
            &self.state.state_events,
            self.clock.as_ref(),
            user_id,
            update,
        )
        .await
    }

    pub async fn set_do_not_disturb_via_update(&self, user_id: Uuid, active: bool) {
        self.update_state(
            user_id,
            StateUpdate {
                do_not_disturb_active: Some(active),
                energy_level: None,
            },
        )
        .await
        .expect("state update accepted");
    }

    /// Run every published state change through the dispatcher
    pub async fn dispatch_pending(&mut self) -> usize {
        let mut dispatched = 0;
        while let Ok(change) = self.background.state_rx.try_recv() {
            self.background.dispatcher.handle(change).await;
            dispatched += 1;
        }
        dispatched
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        use delivery_service::clock::Clock;
        self.clock.now()
    }
}

/// 2024-03-04 is a Monday
pub fn monday_at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
}

pub fn utc_boundary(day: Weekday, start: (u32, u32), end: (u32, u32)) -> TimeBoundary {
    TimeBoundary::new(
        day,
        NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
        NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        chrono_tz::UTC,
    )
}

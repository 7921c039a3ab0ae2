//! Identity state changes (do-not-disturb, energy level) and their
//! consumers.
//!
//! Writers persist the change, then publish a typed [`StateChange`] on a
//! bounded channel. Switching do-not-disturb off also flushes the identity's
//! calm-mode queue before the update returns, so later sends cannot overtake
//! the backlog. A single [`StateDispatcher`] task consumes the channel: it fans
//! the change out to peers and reports to the wellbeing collaborators.

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::EnergyLevel;
use crate::services::activity::{self, ActivityReporter, DailyCounter, GuardianAlert};
use crate::services::availability_store::AvailabilityStore;
use crate::services::scheduler::DeferredDeliveryScheduler;
use crate::websocket::gateway::FanoutGateway;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    DoNotDisturb {
        identity: Uuid,
        active: bool,
        at: DateTime<Utc>,
        /// Set when switching off; start of the period that just ended
        activated_at: Option<DateTime<Utc>>,
    },
    EnergyLevel {
        identity: Uuid,
        level: EnergyLevel,
        at: DateTime<Utc>,
    },
}

impl StateChange {
    pub fn identity(&self) -> Uuid {
        match self {
            StateChange::DoNotDisturb { identity, .. } | StateChange::EnergyLevel { identity, .. } => {
                *identity
            }
        }
    }
}

#[derive(Clone)]
pub struct StateEventBus {
    tx: mpsc::Sender<StateChange>,
}

impl StateEventBus {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<StateChange>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    /// Waits for room when the buffer is full.
    pub async fn publish(&self, change: StateChange) -> AppResult<()> {
        self.tx.send(change).await.map_err(|_| {
            AppError::ServiceUnavailable("state event dispatcher is not running".into())
        })
    }
}

/// Body of a state update; at least one field must be set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_not_disturb_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_level: Option<EnergyLevel>,
}

/// Persist a state update and publish what actually changed.
///
/// Re-sending the current do-not-disturb value is accepted but publishes
/// nothing, so it cannot trigger a second flush or guardian alert.
///
/// Switching do-not-disturb off releases the calm-mode messages created up to
/// that instant before returning. A failed flush is logged and left to the
/// sweep; the update itself still succeeds.
pub async fn apply_state_update(
    availability: &dyn AvailabilityStore,
    scheduler: &DeferredDeliveryScheduler,
    bus: &StateEventBus,
    clock: &dyn Clock,
    identity: Uuid,
    update: StateUpdate,
) -> AppResult<StateUpdate> {
    if update.do_not_disturb_active.is_none() && update.energy_level.is_none() {
        return Err(AppError::BadRequest("empty state update".into()));
    }
    let at = clock.now();

    if let Some(active) = update.do_not_disturb_active {
        let transition = availability.set_do_not_disturb(identity, active, at).await?;
        if transition.changed {
            if !active {
                scheduler.flush_calm_mode(identity, at).await;
            }
            bus.publish(StateChange::DoNotDisturb {
                identity,
                active,
                at,
                activated_at: transition.previously_activated_at,
            })
            .await?;
        }
    }

    if let Some(level) = update.energy_level {
        availability.set_energy_level(identity, level, at).await?;
        bus.publish(StateChange::EnergyLevel {
            identity,
            level,
            at,
        })
        .await?;
    }

    Ok(update)
}

#[derive(Clone)]
pub struct StateDispatcher {
    gateway: Arc<FanoutGateway>,
    activity: Arc<dyn ActivityReporter>,
}

impl StateDispatcher {
    pub fn new(gateway: Arc<FanoutGateway>, activity: Arc<dyn ActivityReporter>) -> Self {
        Self {
            gateway,
            activity,
        }
    }

    pub async fn handle(&self, change: StateChange) {
        match change {
            StateChange::DoNotDisturb {
                identity,
                active,
                at,
                activated_at,
            } => {
                self.gateway
                    .broadcast_state_change(identity, None, Some(active));

                if active {
                    activity::report(
                        "guardian_alert",
                        identity,
                        self.activity.notify_guardians(
                            identity,
                            GuardianAlert::DoNotDisturbActivated,
                            at,
                        ),
                    )
                    .await;
                    return;
                }

                if let Some(started) = activated_at {
                    let minutes = (at - started).num_minutes().max(0);
                    let minutes = i32::try_from(minutes).unwrap_or(i32::MAX);
                    if minutes > 0 {
                        activity::report(
                            "do_not_disturb_minutes",
                            identity,
                            self.activity.increment(
                                identity,
                                at.date_naive(),
                                DailyCounter::DoNotDisturbMinutes,
                                minutes,
                            ),
                        )
                        .await;
                    }
                }
            }
            StateChange::EnergyLevel {
                identity, level, ..
            } => {
                self.gateway
                    .broadcast_state_change(identity, Some(level), None);
            }
        }
    }

    /// Consume the bus until it closes or `shutdown` fires.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<StateChange>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!("Starting state event dispatcher");
        loop {
            tokio::select! {
                change = rx.recv() => {
                    let Some(change) = change else { break };
                    tracing::debug!(user_id = %change.identity(), "dispatching state change");
                    self.handle(change).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Received shutdown signal, stopping state event dispatcher");
                    break;
                }
            }
        }
        tracing::info!("State event dispatcher stopped");
    }
}

//! Deferred delivery scheduler
//!
//! Two triggers share one release path:
//! - a periodic sweep for `outside_time_boundary` messages whose
//!   `deliver_at` has passed
//! - a do-not-disturb deactivation flush for one identity's
//!   `recipient_calm_mode` messages, run before the state update returns
//!
//! The sweep also releases calm-mode messages of recipients whose
//! do-not-disturb is already off, which picks up a flush that failed.
//!
//! The ledger claims messages (queued -> sent) in the same statement that
//! selects them, so overlapping sweeps or a sweep racing a flush release each
//! message once. Failures are logged; anything still queued is picked up on
//! the next cycle.

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::AppResult;
use crate::metrics;
use crate::models::Message;
use crate::services::availability_store::AvailabilityStore;
use crate::services::message_ledger::MessageLedger;
use crate::websocket::gateway::FanoutGateway;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct DeferredDeliveryScheduler {
    ledger: Arc<dyn MessageLedger>,
    availability: Arc<dyn AvailabilityStore>,
    gateway: Arc<FanoutGateway>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl DeferredDeliveryScheduler {
    pub fn new(
        ledger: Arc<dyn MessageLedger>,
        availability: Arc<dyn AvailabilityStore>,
        gateway: Arc<FanoutGateway>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            ledger,
            availability,
            gateway,
            clock,
            config,
        }
    }

    /// One sweep cycle. Returns how many messages were released; a failure is
    /// logged and reported as zero.
    pub async fn sweep(&self) -> usize {
        match self.try_sweep().await {
            Ok(released) => released,
            Err(e) => {
                warn!(error = %e, "sweep failed, queued messages stay queued");
                0
            }
        }
    }

    async fn try_sweep(&self) -> AppResult<usize> {
        let now = self.clock.now();
        let released = self.ledger.release_due(now).await?;
        let count = released.len();
        if count > 0 {
            metrics::record_messages_released("sweep", count);
            for (recipient, batch) in group_by_recipient(released) {
                self.gateway.release(recipient, batch).await;
            }
        }

        let count = count + self.release_stale_calm_mode(now).await?;
        if count > 0 {
            info!(released = count, "sweep released queued messages");
        }
        Ok(count)
    }

    /// Release calm-mode messages whose recipient is no longer in
    /// do-not-disturb.
    async fn release_stale_calm_mode(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let mut count = 0;
        for recipient in self.ledger.calm_mode_recipients().await? {
            match self.availability.get_do_not_disturb(recipient).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(user_id = %recipient, error = %e, "do-not-disturb lookup failed during sweep");
                    continue;
                }
            }

            let released = self.ledger.release_calm_mode(recipient, now).await?;
            if released.is_empty() {
                continue;
            }
            metrics::record_messages_released("sweep", released.len());
            count += released.len();
            self.gateway.release(recipient, released).await;
        }
        Ok(count)
    }

    /// Release everything queued for `identity` because of do-not-disturb
    /// and created at or before `deactivated_at`.
    ///
    /// A failure leaves the messages queued for the next sweep.
    pub async fn flush_calm_mode(&self, identity: Uuid, deactivated_at: DateTime<Utc>) -> usize {
        let released = match self
            .ledger
            .release_calm_mode(identity, deactivated_at)
            .await
        {
            Ok(released) => released,
            Err(e) => {
                warn!(user_id = %identity, error = %e, "calm mode flush failed, next sweep retries");
                return 0;
            }
        };
        if released.is_empty() {
            return 0;
        }

        let count = released.len();
        metrics::record_messages_released("calm_mode_off", count);
        self.gateway.release(identity, released).await;

        info!(user_id = %identity, released = count, "calm mode flush released queued messages");
        count
    }

    /// Sweep on a fixed interval until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval_timer = interval(self.config.sweep_interval);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        info!(
            interval_sec = self.config.sweep_interval.as_secs(),
            "Starting delivery sweep loop"
        );

        loop {
            tokio::select! {
                _ = interval_timer.tick() => {
                    match self.try_sweep().await {
                        Ok(_) => {
                            if consecutive_failures > 0 {
                                info!(
                                    recovered_after = consecutive_failures,
                                    "Delivery sweep recovered after failures"
                                );
                                consecutive_failures = 0;
                            }
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            error!(
                                error = %e,
                                consecutive_failures,
                                "Delivery sweep failed, will retry on next interval"
                            );
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Received shutdown signal, stopping delivery sweep loop");
                    break;
                }
            }
        }

        info!("Delivery sweep loop stopped");
    }
}

/// Split a released set into per-recipient batches, keeping the ledger's
/// order inside each batch.
fn group_by_recipient(messages: Vec<Message>) -> BTreeMap<Uuid, Vec<Message>> {
    let mut batches: BTreeMap<Uuid, Vec<Message>> = BTreeMap::new();
    for message in messages {
        batches.entry(message.recipient_id).or_default().push(message);
    }
    batches
}

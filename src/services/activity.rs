//! Write-only reporting to the wellbeing side of the product: per-identity
//! daily counters and guardian alerts.
//!
//! Callers go through [`report`], which never propagates a failure.

use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::Pool;
use std::fmt;
use std::future::Future;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DailyCounter {
    MessagesSent,
    MessagesReceived,
    DoNotDisturbMinutes,
}

impl DailyCounter {
    fn column(&self) -> &'static str {
        match self {
            DailyCounter::MessagesSent => "messages_sent",
            DailyCounter::MessagesReceived => "messages_received",
            DailyCounter::DoNotDisturbMinutes => "do_not_disturb_minutes",
        }
    }
}

impl fmt::Display for DailyCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardianAlert {
    DoNotDisturbActivated,
}

impl GuardianAlert {
    pub fn to_db(&self) -> &'static str {
        match self {
            GuardianAlert::DoNotDisturbActivated => "do_not_disturb_activated",
        }
    }
}

#[async_trait]
pub trait ActivityReporter: Send + Sync {
    async fn increment(
        &self,
        identity: Uuid,
        day: NaiveDate,
        counter: DailyCounter,
        amount: i32,
    ) -> AppResult<()>;

    async fn notify_guardians(
        &self,
        identity: Uuid,
        alert: GuardianAlert,
        at: DateTime<Utc>,
    ) -> AppResult<()>;
}

/// Await a reporting call and swallow its failure.
pub async fn report<F>(what: &'static str, identity: Uuid, call: F)
where
    F: Future<Output = AppResult<()>>,
{
    if let Err(e) = call.await {
        tracing::warn!(user_id = %identity, report = what, error = %e, "activity report failed");
    }
}

#[derive(Clone)]
pub struct PgActivityReporter {
    db: Pool,
}

impl PgActivityReporter {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActivityReporter for PgActivityReporter {
    async fn increment(
        &self,
        identity: Uuid,
        day: NaiveDate,
        counter: DailyCounter,
        amount: i32,
    ) -> AppResult<()> {
        let client = self.db.get().await?;
        let column = counter.column();
        let sql = format!(
            r#"
            INSERT INTO daily_activity (user_id, activity_date, {column})
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, activity_date)
            DO UPDATE SET {column} = daily_activity.{column} + EXCLUDED.{column}
            "#
        );
        client.execute(&sql, &[&identity, &day, &amount]).await?;
        Ok(())
    }

    async fn notify_guardians(
        &self,
        identity: Uuid,
        alert: GuardianAlert,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let client = self.db.get().await?;
        client
            .execute(
                "INSERT INTO guardian_alerts (id, user_id, alert_type, created_at) VALUES ($1, $2, $3, $4)",
                &[&Uuid::new_v4(), &identity, &alert.to_db(), &at],
            )
            .await?;
        Ok(())
    }
}

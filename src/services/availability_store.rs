use crate::error::AppResult;
use crate::models::availability::weekday_from_db;
use crate::models::{EnergyLevel, RecipientAvailability, TimeBoundary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use deadpool_postgres::Pool;
use uuid::Uuid;

/// Result of writing the do-not-disturb flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoNotDisturbTransition {
    /// False when the flag already had the requested value
    pub changed: bool,
    /// When the flag was last switched on, if it was on before this write
    pub previously_activated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    async fn get_do_not_disturb(&self, identity: Uuid) -> AppResult<bool>;

    async fn get_time_boundaries(&self, identity: Uuid) -> AppResult<Vec<TimeBoundary>>;

    /// Fresh snapshot for one policy evaluation
    async fn get_availability(&self, identity: Uuid) -> AppResult<RecipientAvailability> {
        let do_not_disturb = self.get_do_not_disturb(identity).await?;
        let boundaries = self.get_time_boundaries(identity).await?;
        Ok(RecipientAvailability::new(do_not_disturb, boundaries))
    }

    async fn set_do_not_disturb(
        &self,
        identity: Uuid,
        active: bool,
        at: DateTime<Utc>,
    ) -> AppResult<DoNotDisturbTransition>;

    async fn set_energy_level(
        &self,
        identity: Uuid,
        level: EnergyLevel,
        at: DateTime<Utc>,
    ) -> AppResult<()>;
}

#[derive(Clone)]
pub struct PgAvailabilityStore {
    db: Pool,
}

impl PgAvailabilityStore {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AvailabilityStore for PgAvailabilityStore {
    async fn get_do_not_disturb(&self, identity: Uuid) -> AppResult<bool> {
        let client = self.db.get().await?;
        let row = client
            .query_opt(
                "SELECT active FROM calm_mode_state WHERE user_id = $1",
                &[&identity],
            )
            .await?;
        Ok(row.map(|r| r.get::<_, bool>(0)).unwrap_or(false))
    }

    async fn get_time_boundaries(&self, identity: Uuid) -> AppResult<Vec<TimeBoundary>> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                r#"
                SELECT day_of_week, start_time, end_time, timezone
                FROM time_boundaries
                WHERE user_id = $1
                ORDER BY day_of_week
                "#,
                &[&identity],
            )
            .await?;

        let mut boundaries = Vec::with_capacity(rows.len());
        for row in rows {
            let day: i16 = row.get("day_of_week");
            let Some(day_of_week) = weekday_from_db(day) else {
                tracing::warn!(user_id = %identity, day_of_week = day, "ignoring boundary with invalid weekday");
                continue;
            };
            let tz_name: String = row.get("timezone");
            let timezone = tz_name.parse::<Tz>().unwrap_or_else(|e| {
                tracing::warn!(user_id = %identity, timezone = %tz_name, error = %e, "unknown timezone, using UTC");
                Tz::UTC
            });
            boundaries.push(TimeBoundary::new(
                day_of_week,
                row.get("start_time"),
                row.get("end_time"),
                timezone,
            ));
        }
        Ok(boundaries)
    }

    async fn set_do_not_disturb(
        &self,
        identity: Uuid,
        active: bool,
        at: DateTime<Utc>,
    ) -> AppResult<DoNotDisturbTransition> {
        let mut client = self.db.get().await?;
        let tx = client.transaction().await?;

        let previous = tx
            .query_opt(
                "SELECT active, activated_at FROM calm_mode_state WHERE user_id = $1 FOR UPDATE",
                &[&identity],
            )
            .await?;
        let (was_active, activated_at): (bool, Option<DateTime<Utc>>) = previous
            .map(|row| (row.get(0), row.get(1)))
            .unwrap_or((false, None));

        let new_activated_at = if active {
            if was_active {
                activated_at
            } else {
                Some(at)
            }
        } else {
            None
        };

        tx.execute(
            r#"
            INSERT INTO calm_mode_state (user_id, active, activated_at, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id)
            DO UPDATE SET active = EXCLUDED.active,
                          activated_at = EXCLUDED.activated_at,
                          updated_at = EXCLUDED.updated_at
            "#,
            &[&identity, &active, &new_activated_at, &at],
        )
        .await?;
        tx.commit().await?;

        Ok(DoNotDisturbTransition {
            changed: was_active != active,
            previously_activated_at: if was_active { activated_at } else { None },
        })
    }

    async fn set_energy_level(
        &self,
        identity: Uuid,
        level: EnergyLevel,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let client = self.db.get().await?;
        client
            .execute(
                r#"
                INSERT INTO user_energy_state (user_id, energy_level, updated_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (user_id)
                DO UPDATE SET energy_level = EXCLUDED.energy_level,
                              updated_at = EXCLUDED.updated_at
                "#,
                &[&identity, &level.to_db(), &at],
            )
            .await?;
        Ok(())
    }
}

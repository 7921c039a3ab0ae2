use deadpool_postgres::Pool;

use crate::error::AppError;

// Embed SQL migrations at compile time for deterministic startup
const MIG_0001: &str = include_str!("../migrations/0001_create_conversations.sql");
const MIG_0002: &str = include_str!("../migrations/0002_create_availability.sql");
const MIG_0003: &str = include_str!("../migrations/0003_create_messages.sql");
const MIG_0004: &str = include_str!("../migrations/0004_create_activity.sql");

/// Apply every migration in order. Each file is idempotent (`IF NOT EXISTS`),
/// so a restart re-runs them harmlessly.
pub async fn run_all(db: &Pool) -> Result<(), AppError> {
    let client = db.get().await?;
    for (i, sql) in [MIG_0001, MIG_0002, MIG_0003, MIG_0004]
        .into_iter()
        .enumerate()
    {
        let label = i + 1;
        client.batch_execute(sql).await.map_err(|e| {
            tracing::error!(migration = %label, error = %e, "migration failed");
            AppError::StartServer(format!("migration {label}: {e}"))
        })?;
        tracing::info!(migration = %label, "delivery-service migration applied");
    }
    Ok(())
}

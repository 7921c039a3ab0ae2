use crate::error::AppError;
use deadpool_postgres::{Manager, Pool};
use tokio_postgres::NoTls;

pub async fn init_pool(database_url: &str, max_size: usize) -> Result<Pool, AppError> {
    let config = database_url
        .parse::<tokio_postgres::Config>()
        .map_err(|e| AppError::Config(format!("invalid DATABASE_URL: {e}")))?;

    let manager = Manager::new(config, NoTls);
    let pool = Pool::builder(manager)
        .max_size(max_size)
        .build()
        .map_err(|e| AppError::StartServer(format!("build db pool: {e}")))?;

    // Fail fast when the database is unreachable at startup
    let client = pool.get().await?;
    client.simple_query("SELECT 1").await?;
    tracing::info!(max_size, "database pool ready");

    Ok(pool)
}

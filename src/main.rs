use actix_web::{web, App, HttpServer};
use delivery_service::{
    clock::SystemClock,
    config, db, error, logging, migrations,
    middleware::Logging,
    routes,
    services::{
        Collaborators, JwtIdentityResolver, PgActivityReporter, PgAvailabilityStore,
        PgConversationStore, PgMessageLedger,
    },
    state::AppState,
};
use std::sync::Arc;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let db = db::init_pool(&cfg.database_url, cfg.database_max_connections)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
    migrations::run_all(&db).await?;

    let identity = JwtIdentityResolver::from_public_key_pem(&cfg.jwt_public_key_pem)
        .map_err(|e| error::AppError::StartServer(format!("Failed to load JWT public key: {e}")))?;

    let deps = Collaborators {
        ledger: Arc::new(PgMessageLedger::new(db.clone())),
        conversations: Arc::new(PgConversationStore::new(db.clone())),
        availability: Arc::new(PgAvailabilityStore::new(db.clone())),
        identity: Arc::new(identity),
        activity: Arc::new(PgActivityReporter::new(db.clone())),
    };

    let (state, background) = AppState::new(cfg.clone(), deps, Arc::new(SystemClock));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let sweep_task = tokio::spawn(background.scheduler.run(shutdown_tx.subscribe()));
    let dispatcher_task = tokio::spawn(
        background
            .dispatcher
            .run(background.state_rx, shutdown_tx.subscribe()),
    );

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting delivery-service");

    // actix-web server futures are not Send, so the server runs in the foreground
    let rest_state = state.clone();
    let server = HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(Logging)
            .app_data(web::Data::new(rest_state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run();

    let result = server
        .await
        .map_err(|e| error::AppError::StartServer(format!("REST server: {e}")));

    tracing::info!("HTTP server stopped, shutting down background tasks");
    let _ = shutdown_tx.send(());
    if let Err(e) = sweep_task.await {
        tracing::error!(error = %e, "delivery sweep task panicked");
    }
    if let Err(e) = dispatcher_task.await {
        tracing::error!(error = %e, "state dispatcher task panicked");
    }

    result
}

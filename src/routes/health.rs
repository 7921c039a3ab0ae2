use crate::metrics::metrics_handler;
use actix_web::{get, HttpResponse};

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/metrics")]
pub async fn metrics() -> HttpResponse {
    metrics_handler().await
}

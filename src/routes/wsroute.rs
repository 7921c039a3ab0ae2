use crate::middleware::guards::bearer_token;
use crate::state::AppState;
use crate::websocket::WsSession;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Upgrade to a realtime connection.
///
/// The credential comes from `?token=` or an `Authorization: Bearer` header.
/// It is resolved inside the session, so a rejected credential still gets an
/// `error` event before the socket closes.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let credential = query
        .into_inner()
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&req));

    if credential.is_none() {
        tracing::debug!("WebSocket upgrade without a credential");
    }

    let session = WsSession::new(state.gateway.clone(), credential, state.config.ws.clone());
    ws::start(session, &req, stream)
}

pub mod health;
pub mod state;
pub mod wsroute;

use actix_web::web;

/// Register every route of the service on an `App`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(wsroute::ws_handler)
        .service(state::update_state)
        .service(health::health)
        .service(health::metrics);
}
